/// A decoded text command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Play(String),
    Skip,
    Stop,
    Pause,
    Resume,
    Queue,
    NowPlaying,
    Help,
    Ping,
}

/// Entry of the command table shown by `help`
pub struct CommandInfo {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub usage: &'static str,
    pub description: &'static str,
}

pub const COMMANDS: &[CommandInfo] = &[
    CommandInfo {
        name: "play",
        aliases: &["p"],
        usage: "play <title or URL>",
        description: "Play a song or add it to the queue",
    },
    CommandInfo {
        name: "skip",
        aliases: &["s"],
        usage: "skip",
        description: "Skip the current song",
    },
    CommandInfo {
        name: "stop",
        aliases: &["leave", "dc"],
        usage: "stop",
        description: "Stop playback and leave the voice channel",
    },
    CommandInfo {
        name: "pause",
        aliases: &[],
        usage: "pause",
        description: "Pause the current song",
    },
    CommandInfo {
        name: "resume",
        aliases: &[],
        usage: "resume",
        description: "Resume playback",
    },
    CommandInfo {
        name: "queue",
        aliases: &["q"],
        usage: "queue",
        description: "Show the queue",
    },
    CommandInfo {
        name: "nowplaying",
        aliases: &["np"],
        usage: "nowplaying",
        description: "Show the song that is playing",
    },
    CommandInfo {
        name: "help",
        aliases: &[],
        usage: "help",
        description: "Show this list",
    },
    CommandInfo {
        name: "ping",
        aliases: &[],
        usage: "ping",
        description: "Check the bot's latency",
    },
];

impl Command {
    /// Decodes `content` if it starts with `prefix` and names a known verb.
    ///
    /// Verbs are case-insensitive; everything after the verb is the argument string.
    pub fn parse(prefix: &str, content: &str) -> Option<Self> {
        let body = content.trim_start().strip_prefix(prefix)?;
        let mut parts = body.trim_start().splitn(2, char::is_whitespace);
        let verb = parts.next()?.to_lowercase();
        let args = parts.next().unwrap_or("").trim();

        let command = match verb.as_str() {
            "play" | "p" => Command::Play(args.to_string()),
            "skip" | "s" => Command::Skip,
            "stop" | "leave" | "dc" => Command::Stop,
            "pause" => Command::Pause,
            "resume" => Command::Resume,
            "queue" | "q" => Command::Queue,
            "nowplaying" | "np" => Command::NowPlaying,
            "help" => Command::Help,
            "ping" => Command::Ping,
            _ => return None,
        };

        Some(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Play(_) => "play",
            Command::Skip => "skip",
            Command::Stop => "stop",
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::Queue => "queue",
            Command::NowPlaying => "nowplaying",
            Command::Help => "help",
            Command::Ping => "ping",
        }
    }

    /// Commands that act on the requester's voice session.
    pub fn requires_voice(&self) -> bool {
        matches!(self, Command::Play(_) | Command::Skip | Command::Stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_play_keeps_the_whole_query() {
        assert_eq!(
            Command::parse("!", "!play never gonna  give you up"),
            Some(Command::Play("never gonna  give you up".into()))
        );
        assert_eq!(
            Command::parse("!", "!p https://youtu.be/dQw4w9WgXcQ"),
            Some(Command::Play("https://youtu.be/dQw4w9WgXcQ".into()))
        );
        assert_eq!(Command::parse("!", "!play"), Some(Command::Play(String::new())));
    }

    #[test]
    fn test_aliases_and_case() {
        assert_eq!(Command::parse("!", "!S"), Some(Command::Skip));
        assert_eq!(Command::parse("!", "!leave"), Some(Command::Stop));
        assert_eq!(Command::parse("!", "!DC"), Some(Command::Stop));
        assert_eq!(Command::parse("!", "!q"), Some(Command::Queue));
        assert_eq!(Command::parse("!", "!NowPlaying"), Some(Command::NowPlaying));
        assert_eq!(Command::parse("!", "!np"), Some(Command::NowPlaying));
    }

    #[test]
    fn test_other_messages_are_ignored() {
        assert_eq!(Command::parse("!", "play something"), None);
        assert_eq!(Command::parse("!", "!volume 50"), None);
        assert_eq!(Command::parse("!", "!"), None);
        assert_eq!(Command::parse("?", "!play x"), None);
    }

    #[test]
    fn test_custom_prefix() {
        assert_eq!(Command::parse("mb!", "mb!pause"), Some(Command::Pause));
        assert_eq!(Command::parse("mb!", "mb! resume"), Some(Command::Resume));
    }

    #[test]
    fn test_command_table_matches_parser() {
        for info in COMMANDS {
            let parsed = Command::parse("!", &format!("!{} x", info.name)).unwrap();
            assert_eq!(parsed.name(), info.name);
            for alias in info.aliases {
                let parsed = Command::parse("!", &format!("!{} x", alias)).unwrap();
                assert_eq!(parsed.name(), info.name);
            }
        }
    }
}
