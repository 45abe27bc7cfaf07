use std::path::PathBuf;

use clap::Args;

use remoteapp::{DefaultContext, TestApp};

use crate::target::Target;

#[derive(Args)]
pub struct Install {
    #[command(flatten)]
    target: Target,

    /// The apk to install. Without it the app must already be installed
    /// for the user
    #[arg(short, long)]
    apk: Option<PathBuf>,
}

impl Install {
    pub fn run(&self, ctx: &DefaultContext) -> anyhow::Result<()> {
        let provider = self.target.provider(ctx)?;
        let mut app = TestApp::new(&self.target.package);
        if let Some(apk) = &self.apk {
            app = app.with_apk(apk.clone());
        }
        let inst = provider.install(&app, self.target.user_id()?)?;
        println!("installed {}", inst.key());
        Ok(())
    }
}
