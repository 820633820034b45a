//! Network namespace addressing.

use std::fmt;

use tokio::process::Command;

/// The network namespace a command or device lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Netns {
    /// The namespace of this process.
    Host,
    /// The namespace of the given process, usually a container's init.
    Pid(u32),
}

impl Netns {
    /// Build a command that runs `program` inside this namespace.
    ///
    /// For [`Netns::Pid`] the program is wrapped in
    /// `nsenter --target <pid> --net`.
    #[must_use]
    pub fn command(self, program: &str) -> Command {
        match self {
            Self::Host => Command::new(program),
            Self::Pid(pid) => {
                let mut cmd = Command::new("nsenter");
                cmd.args(["--target", &pid.to_string(), "--net", "--", program]);
                cmd
            }
        }
    }

    /// Whether this is the host namespace.
    #[must_use]
    pub const fn is_host(self) -> bool {
        matches!(self, Self::Host)
    }
}

impl fmt::Display for Netns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => write!(f, "host"),
            Self::Pid(pid) => write!(f, "pid:{pid}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_namespace_wraps_in_nsenter() {
        let cmd = Netns::Pid(4321).command("ethtool");
        let std_cmd = cmd.as_std();
        assert_eq!(std_cmd.get_program(), "nsenter");
        let args: Vec<_> = std_cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args, ["--target", "4321", "--net", "--", "ethtool"]);
    }

    #[test]
    fn host_namespace_runs_directly() {
        let cmd = Netns::Host.command("ip");
        assert_eq!(cmd.as_std().get_program(), "ip");
        assert_eq!(cmd.as_std().get_args().count(), 0);
    }

    #[test]
    fn display() {
        assert_eq!(Netns::Host.to_string(), "host");
        assert_eq!(Netns::Pid(7).to_string(), "pid:7");
    }
}
