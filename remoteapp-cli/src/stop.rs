use clap::Args;

use remoteapp::DefaultContext;

use crate::target::Target;

#[derive(Args)]
pub struct Stop {
    #[command(flatten)]
    target: Target,
}

impl Stop {
    pub fn run(&self, ctx: &DefaultContext) -> anyhow::Result<()> {
        let provider = self.target.provider(ctx)?;
        let inst = self.target.instance(&provider)?;
        inst.stop()?;
        Ok(())
    }
}
