use clap::Args;

use remoteapp::device;
use remoteapp::DefaultContext;

use crate::target::Target;

#[derive(Args)]
pub struct Status {
    #[command(flatten)]
    target: Target,
}

impl Status {
    pub fn run(&self, ctx: &DefaultContext) -> anyhow::Result<()> {
        let provider = self.target.provider(ctx)?;
        let user = self.target.user_id()?;
        let adb = provider.adb();

        let user_running = device::is_user_running(adb, user)?;
        let installed = device::is_installed(adb, &self.target.package, user)?;
        let proc = if installed {
            device::find_process(adb, &self.target.package, user)?
        } else {
            None
        };

        println!("package:   {}", self.target.package);
        println!("user:      {} ({})", user, if user_running { "running" } else { "stopped" });
        println!("installed: {}", installed);
        match proc {
            Some(p) => println!("process:   {}", p),
            None => println!("process:   not running"),
        }
        Ok(())
    }
}
