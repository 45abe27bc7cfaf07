use clap::Args;

use remoteapp::DefaultContext;

use crate::target::Target;

#[derive(Args)]
pub struct Uninstall {
    #[command(flatten)]
    target: Target,
}

impl Uninstall {
    pub fn run(&self, ctx: &DefaultContext) -> anyhow::Result<()> {
        let provider = self.target.provider(ctx)?;
        let inst = self.target.instance(&provider)?;
        inst.close()?;
        provider.forget(&inst);
        println!("uninstalled {}", inst.key());
        Ok(())
    }
}
