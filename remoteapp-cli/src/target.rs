use std::sync::Arc;

use clap::Args;

use remoteapp::{DefaultContext, TestAppInstance, TestAppProvider, UserId};

/// Selects the helper app instance a command acts on
#[derive(Args, Debug)]
pub struct Target {
    /// The helper app's package
    #[arg(short, long)]
    pub package: String,

    /// The user the helper app is installed for
    #[arg(short, long, default_value_t = 0)]
    pub user: i32,
}

impl Target {
    pub fn user_id(&self) -> anyhow::Result<UserId> {
        Ok(UserId::new(self.user)?)
    }

    pub fn provider(&self, ctx: &DefaultContext) -> anyhow::Result<TestAppProvider> {
        Ok(TestAppProvider::from_ctx(ctx)?)
    }

    pub fn instance(&self, provider: &TestAppProvider) -> anyhow::Result<Arc<TestAppInstance>> {
        let inst = provider.instance(&self.package, self.user_id()?)?;
        log::debug!("using {}", inst.key());
        Ok(inst)
    }
}
