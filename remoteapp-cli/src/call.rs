use anyhow::Context;
use clap::Args;
use serde_json::Value;

use remoteapp::DefaultContext;

use crate::target::Target;

#[derive(Args)]
pub struct Call {
    #[command(flatten)]
    target: Target,

    /// The subsystem (service) name, for example `package` or `account`
    subsystem: String,

    /// The method to invoke
    method: String,

    /// Arguments as a JSON array
    #[arg(default_value = "[]")]
    args: String,
}

impl Call {
    fn parse_args(&self) -> anyhow::Result<Value> {
        let args: Value = serde_json::from_str(&self.args)
            .with_context(|| format!("parsing arguments {}", self.args))?;
        if !args.is_array() {
            anyhow::bail!("arguments must be a JSON array, got {}", self.args);
        }
        Ok(args)
    }

    pub fn run(&self, ctx: &DefaultContext) -> anyhow::Result<()> {
        let args = self.parse_args()?;
        let provider = self.target.provider(ctx)?;
        let inst = self.target.instance(&provider)?;
        let res = inst.invoke(&self.subsystem, &self.method, &args)?;
        println!("{}", serde_json::to_string_pretty(&res)?);
        Ok(())
    }
}
