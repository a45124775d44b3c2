//! Frame id namespaces.
//!
//! Three disjoint ranges share the `i32` id field of a frame:
//! - [`Command`]: application to worker, `48..=93`
//! - [`Info`]: worker to application, non-terminal, `10..=30`
//! - [`Message`]: worker to application, protocol-significant, `100..`
//!
//! Commands keep their historic character values (`'0'` for HOST, `'A'` for
//! NONE and so on) so that traces from older peers stay readable.

/// Commands sent from the application to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Command {
    Host = 48,
    Connect = 49,
    Disconnect = 50,
    SlaveStatus = 51,
    SlaveConnect = 52,
    SlaveHold = 53,
    None = 65,
    TestDir = 66,
    Get = 67,
    Put = 68,
    Stat = 69,
    MimeType = 70,
    ListDir = 71,
    Mkdir = 72,
    Rename = 73,
    Copy = 74,
    Del = 75,
    Chmod = 76,
    Special = 77,
    UserPass = 78,
    ReparseConfiguration = 79,
    MetaData = 80,
    Symlink = 81,
    SubUrl = 82,
    MessageBoxAnswer = 83,
    ResumeAnswer = 84,
    Config = 85,
    MultiGet = 86,
    Open = 88,
    Chown = 89,
    Read = 90,
    Write = 91,
    Seek = 92,
    Close = 93,
}

impl Command {
    /// Every command, in id order.
    pub const ALL: [Command; 34] = [
        Command::Host,
        Command::Connect,
        Command::Disconnect,
        Command::SlaveStatus,
        Command::SlaveConnect,
        Command::SlaveHold,
        Command::None,
        Command::TestDir,
        Command::Get,
        Command::Put,
        Command::Stat,
        Command::MimeType,
        Command::ListDir,
        Command::Mkdir,
        Command::Rename,
        Command::Copy,
        Command::Del,
        Command::Chmod,
        Command::Special,
        Command::UserPass,
        Command::ReparseConfiguration,
        Command::MetaData,
        Command::Symlink,
        Command::SubUrl,
        Command::MessageBoxAnswer,
        Command::ResumeAnswer,
        Command::Config,
        Command::MultiGet,
        Command::Open,
        Command::Chown,
        Command::Read,
        Command::Write,
        Command::Seek,
        Command::Close,
    ];

    pub fn from_id(id: i32) -> Option<Command> {
        Self::ALL.iter().copied().find(|c| *c as i32 == id)
    }

    /// Subcommands may interleave with any blocking sub-dialogue.
    pub fn is_sub_command(self) -> bool {
        matches!(
            self,
            Command::ReparseConfiguration
                | Command::MetaData
                | Command::Config
                | Command::SubUrl
                | Command::SlaveStatus
                | Command::SlaveConnect
                | Command::SlaveHold
                | Command::MultiGet
        )
    }

    /// Human readable operation name, used in "unsupported action" texts.
    pub fn operation_name(self) -> &'static str {
        match self {
            Command::Host => "set host",
            Command::Connect => "connect",
            Command::Disconnect => "disconnect",
            Command::SlaveStatus => "status",
            Command::SlaveConnect => "slave connect",
            Command::SlaveHold => "hold",
            Command::None => "none",
            Command::TestDir => "test directory",
            Command::Get => "retrieve data",
            Command::Put => "write data",
            Command::Stat => "stat",
            Command::MimeType => "determine mime type",
            Command::ListDir => "list directory",
            Command::Mkdir => "create directory",
            Command::Rename => "rename",
            Command::Copy => "copy",
            Command::Del => "delete",
            Command::Chmod => "change permissions",
            Command::Special => "special command",
            Command::UserPass => "user/password",
            Command::ReparseConfiguration => "reparse configuration",
            Command::MetaData => "meta data",
            Command::Symlink => "create symlink",
            Command::SubUrl => "sub url",
            Command::MessageBoxAnswer => "message box answer",
            Command::ResumeAnswer => "resume answer",
            Command::Config => "config",
            Command::MultiGet => "retrieve multiple files",
            Command::Open => "open file",
            Command::Chown => "change ownership",
            Command::Read => "read",
            Command::Write => "write",
            Command::Seek => "seek",
            Command::Close => "close",
        }
    }
}

/// Non-terminal notifications from a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Info {
    TotalSize = 10,
    ProcessedSize = 11,
    Speed = 12,
    Redirection = 20,
    MimeType = 21,
    ErrorPage = 22,
    Warning = 23,
    GettingFile = 24,
    NeedPasswd = 25,
    InfoMessage = 26,
    MetaData = 27,
    NetworkStatus = 28,
    MessageBox = 29,
    Position = 30,
}

impl Info {
    pub fn from_id(id: i32) -> Option<Info> {
        let info = match id {
            10 => Info::TotalSize,
            11 => Info::ProcessedSize,
            12 => Info::Speed,
            20 => Info::Redirection,
            21 => Info::MimeType,
            22 => Info::ErrorPage,
            23 => Info::Warning,
            24 => Info::GettingFile,
            25 => Info::NeedPasswd,
            26 => Info::InfoMessage,
            27 => Info::MetaData,
            28 => Info::NetworkStatus,
            29 => Info::MessageBox,
            30 => Info::Position,
            _ => return None,
        };
        Some(info)
    }
}

/// Protocol-significant messages from a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Message {
    Data = 100,
    DataReq = 101,
    Error = 102,
    Connected = 103,
    Finished = 104,
    StatEntry = 105,
    ListEntries = 106,
    Renamed = 107,
    Resume = 108,
    SlaveStatus = 109,
    SlaveAck = 110,
    NetRequest = 111,
    NetDrop = 112,
    NeedSubUrlData = 113,
    CanResume = 114,
    AuthKey = 115,
    AuthKeyDel = 116,
    Opened = 117,
    Written = 118,
}

impl Message {
    pub fn from_id(id: i32) -> Option<Message> {
        let msg = match id {
            100 => Message::Data,
            101 => Message::DataReq,
            102 => Message::Error,
            103 => Message::Connected,
            104 => Message::Finished,
            105 => Message::StatEntry,
            106 => Message::ListEntries,
            107 => Message::Renamed,
            108 => Message::Resume,
            109 => Message::SlaveStatus,
            110 => Message::SlaveAck,
            111 => Message::NetRequest,
            112 => Message::NetDrop,
            113 => Message::NeedSubUrlData,
            114 => Message::CanResume,
            115 => Message::AuthKey,
            116 => Message::AuthKeyDel,
            117 => Message::Opened,
            118 => Message::Written,
            _ => return None,
        };
        Some(msg)
    }
}

impl From<Command> for i32 {
    fn from(cmd: Command) -> i32 {
        cmd as i32
    }
}

impl From<Info> for i32 {
    fn from(info: Info) -> i32 {
        info as i32
    }
}

impl From<Message> for i32 {
    fn from(msg: Message) -> i32 {
        msg as i32
    }
}

/// A decoded frame id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Command(Command),
    Info(Info),
    Message(Message),
    Unknown(i32),
}

impl FrameKind {
    pub fn from_id(id: i32) -> FrameKind {
        if let Some(cmd) = Command::from_id(id) {
            FrameKind::Command(cmd)
        } else if let Some(info) = Info::from_id(id) {
            FrameKind::Info(info)
        } else if let Some(msg) = Message::from_id(id) {
            FrameKind::Message(msg)
        } else {
            FrameKind::Unknown(id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_historic_command_values() {
        assert_eq!(Command::Host as i32, b'0' as i32);
        assert_eq!(Command::None as i32, b'A' as i32);
        assert_eq!(Command::Get as i32, b'C' as i32);
        assert_eq!(Command::ResumeAnswer as i32, b'T' as i32);
    }

    #[test]
    fn test_command_table_matches_discriminants() {
        for cmd in Command::ALL {
            assert_eq!(Command::from_id(cmd as i32), Some(cmd));
        }
        assert_eq!(Command::from_id(87), None);
    }

    #[test]
    fn test_namespaces_disjoint() {
        for id in -5..200 {
            let hits = [
                Command::from_id(id).is_some(),
                Info::from_id(id).is_some(),
                Message::from_id(id).is_some(),
            ]
            .iter()
            .filter(|hit| **hit)
            .count();
            assert!(hits <= 1, "id {} claimed by {} namespaces", id, hits);
        }
    }

    #[test]
    fn test_sub_commands() {
        assert!(Command::MetaData.is_sub_command());
        assert!(Command::Config.is_sub_command());
        assert!(Command::ReparseConfiguration.is_sub_command());
        assert!(Command::SlaveStatus.is_sub_command());
        assert!(Command::SubUrl.is_sub_command());
        assert!(Command::MultiGet.is_sub_command());
        assert!(!Command::Get.is_sub_command());
        assert!(!Command::ResumeAnswer.is_sub_command());
        assert!(!Command::None.is_sub_command());
    }

    #[test]
    fn test_frame_kind() {
        assert_eq!(FrameKind::from_id(67), FrameKind::Command(Command::Get));
        assert_eq!(FrameKind::from_id(21), FrameKind::Info(Info::MimeType));
        assert_eq!(FrameKind::from_id(102), FrameKind::Message(Message::Error));
        assert_eq!(FrameKind::from_id(9999), FrameKind::Unknown(9999));
    }
}
