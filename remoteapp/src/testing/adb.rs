use std::io;
use std::process::ExitStatus;

use mockall::mock;
use rstest::fixture;

use crate::command::CmdOutput;
use crate::instance::UserId;

mock! {
    pub Adb {

    }

    impl crate::adb::Adb for Adb {
        fn install_for_user(&self, apk: &str, user: UserId) -> crate::Result<()>;
        fn shell(&self, shell_cmd: &str) -> io::Result<CmdOutput>;
        fn forward_generic(&self, local: &str, remote: &str) -> io::Result<CmdOutput>;
        fn remove_forward(&self, local: &str) -> io::Result<CmdOutput>;
    }
}

#[fixture]
pub fn mock_adb() -> MockAdb {
    MockAdb::new()
}

#[cfg(unix)]
fn exit_status(code: i32) -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;
    ExitStatus::from_raw(code << 8)
}

#[cfg(windows)]
fn exit_status(code: i32) -> ExitStatus {
    use std::os::windows::process::ExitStatusExt;
    ExitStatus::from_raw(code as u32)
}

/// Output of a command that exited with `code`
pub fn cmd_output(code: i32, stdout: &str, stderr: &str) -> CmdOutput {
    CmdOutput {
        status: exit_status(code),
        stdout: stdout.as_bytes().to_vec(),
        stderr: stderr.as_bytes().to_vec(),
    }
}
