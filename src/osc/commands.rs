/// Reserved six-byte prefix carried by every command address.
pub const COMMAND_PREFIX: &str = "/scin_";

/// The command families the dispatcher understands, identified by the
/// address suffix after the `/scin_` prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Quit,
    Status,
    Notify,
    DumpOsc,
    Error,
    Version,
    DefLoad,
    DefReceive,
    DefFree,
    ScinthNew,
    NodeFree,
    NodeRun,
    NodeSet,
    AdvanceFrame,
    ScreenShot,
}

impl Command {
    pub fn from_suffix(suffix: &str) -> Option<Command> {
        match suffix {
            "quit" => Some(Command::Quit),
            "status" => Some(Command::Status),
            "notify" => Some(Command::Notify),
            "dumpOSC" => Some(Command::DumpOsc),
            "error" => Some(Command::Error),
            "version" => Some(Command::Version),
            "d_load" => Some(Command::DefLoad),
            "d_recv" => Some(Command::DefReceive),
            "d_free" => Some(Command::DefFree),
            "s_new" => Some(Command::ScinthNew),
            "n_free" => Some(Command::NodeFree),
            "n_run" => Some(Command::NodeRun),
            "n_set" => Some(Command::NodeSet),
            "nrt_advanceFrame" => Some(Command::AdvanceFrame),
            "nrt_screenShot" => Some(Command::ScreenShot),
            _ => None,
        }
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            Command::Quit => "quit",
            Command::Status => "status",
            Command::Notify => "notify",
            Command::DumpOsc => "dumpOSC",
            Command::Error => "error",
            Command::Version => "version",
            Command::DefLoad => "d_load",
            Command::DefReceive => "d_recv",
            Command::DefFree => "d_free",
            Command::ScinthNew => "s_new",
            Command::NodeFree => "n_free",
            Command::NodeRun => "n_run",
            Command::NodeSet => "n_set",
            Command::AdvanceFrame => "nrt_advanceFrame",
            Command::ScreenShot => "nrt_screenShot",
        }
    }
}

/// Splits a full address into its command, or None when the prefix is
/// absent or the suffix unknown.
pub fn parse_address(addr: &str) -> Option<Command> {
    let suffix = addr.strip_prefix(COMMAND_PREFIX)?;
    Command::from_suffix(suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_suffix_round_trips() {
        for command in [
            Command::Quit,
            Command::Status,
            Command::Notify,
            Command::DumpOsc,
            Command::Error,
            Command::Version,
            Command::DefLoad,
            Command::DefReceive,
            Command::DefFree,
            Command::ScinthNew,
            Command::NodeFree,
            Command::NodeRun,
            Command::NodeSet,
            Command::AdvanceFrame,
            Command::ScreenShot,
        ] {
            assert_eq!(Command::from_suffix(command.suffix()), Some(command));
        }
    }

    #[test]
    fn address_parsing_requires_the_prefix() {
        assert_eq!(parse_address("/scin_quit"), Some(Command::Quit));
        assert_eq!(parse_address("/quit"), None);
        assert_eq!(parse_address("/s_new"), None);
        assert_eq!(parse_address("/scin_bogus"), None);
        assert_eq!(parse_address("scin_quit"), None);
    }
}
