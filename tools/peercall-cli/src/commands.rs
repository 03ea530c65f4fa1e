//! Call-screen commands

use std::fmt;

pub const HELP: &str = "\
Commands:
  id            show your id (give it to the person calling you)
  call <id>     call another user
  accept        answer the incoming call
  decline       reject the incoming call
  hangup        end or cancel the current call
  camera        turn the camera on or off
  mic           mute or unmute the microphone
  status        show the call screen
  devices       list cameras and microphones
  setup         choose devices again (between calls)
  help          show this list
  quit          leave";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Id,
    Call(Option<String>),
    Accept,
    Decline,
    HangUp,
    Camera,
    Mic,
    Status,
    Devices,
    Setup,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCommand(pub String);

impl fmt::Display for UnknownCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown command '{}'. Type 'help' for commands.", self.0)
    }
}

impl Command {
    /// Parse one input line; blank lines give `None`
    pub fn parse(line: &str) -> Result<Option<Self>, UnknownCommand> {
        let mut words = line.split_whitespace();
        let Some(word) = words.next() else {
            return Ok(None);
        };

        let command = match word.to_lowercase().as_str() {
            "id" | "me" => Command::Id,
            "call" => Command::Call(words.next().map(str::to_string)),
            "accept" | "answer" => Command::Accept,
            "decline" | "reject" => Command::Decline,
            "hangup" | "hang-up" | "end" => Command::HangUp,
            "camera" | "cam" | "video" => Command::Camera,
            "mic" | "mute" | "audio" => Command::Mic,
            "status" => Command::Status,
            "devices" => Command::Devices,
            "setup" => Command::Setup,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => return Err(UnknownCommand(other.to_string())),
        };
        Ok(Some(command))
    }
}
