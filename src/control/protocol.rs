//! Textual control commands
//!
//! ```text
//! merge <id>
//! unmerge <id>
//! add_axis <id> <src> [dst]      del_axis <dst>
//! add_button <id> <src> [dst]    del_button <dst>
//! ```
//!
//! After the keyword only whitespace and decimal digits may follow, up to the
//! end of the buffer. Anything else rejects the whole command. Rejected and
//! ineffective commands are no-ops; the writer never gets an error back.

use crate::engine::Engine;
use crate::mapping::ChannelKind;
use crate::source::Fingerprint;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Command is not valid UTF-8")]
    NotUtf8,

    #[error("Empty command")]
    Empty,

    #[error("Unknown command: {0}")]
    UnknownKeyword(String),

    #[error("Missing arguments for {0}")]
    MissingArguments(&'static str),

    #[error("Unexpected character {0:?}")]
    UnexpectedCharacter(char),
}

/// A parsed control command
///
/// Numeric fields that did not parse are `None`: an absent id matches no
/// source, an absent destination picks the lowest free channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Merge(Option<Fingerprint>),
    Unmerge(Option<Fingerprint>),
    Add {
        kind: ChannelKind,
        source: Option<Fingerprint>,
        src: Option<usize>,
        dst: Option<usize>,
    },
    Del {
        kind: ChannelKind,
        dst: Option<usize>,
    },
}

impl Command {
    pub fn parse(input: &[u8]) -> Result<Self, ParseError> {
        let text = std::str::from_utf8(input).map_err(|_| ParseError::NotUtf8)?;
        let text = text.trim_start();

        let (keyword, rest) = text
            .split_once(char::is_whitespace)
            .unwrap_or((text, ""));
        if keyword.is_empty() {
            return Err(ParseError::Empty);
        }

        let keyword: &'static str = match keyword {
            "merge" => "merge",
            "unmerge" => "unmerge",
            "add_axis" => "add_axis",
            "add_button" => "add_button",
            "del_axis" => "del_axis",
            "del_button" => "del_button",
            other => return Err(ParseError::UnknownKeyword(other.to_string())),
        };

        if let Some(bad) = rest
            .chars()
            .find(|c| !c.is_ascii_digit() && !c.is_whitespace())
        {
            return Err(ParseError::UnexpectedCharacter(bad));
        }

        if rest.trim().is_empty() {
            return Err(ParseError::MissingArguments(keyword));
        }

        let mut fields = rest.split_whitespace();
        let command = match keyword {
            "merge" => Command::Merge(fingerprint(fields.next())),
            "unmerge" => Command::Unmerge(fingerprint(fields.next())),
            "add_axis" | "add_button" => Command::Add {
                kind: kind_of(keyword),
                source: fingerprint(fields.next()),
                src: number(fields.next()),
                dst: number(fields.next()),
            },
            _ => Command::Del {
                kind: kind_of(keyword),
                dst: number(fields.next()),
            },
        };

        Ok(command)
    }

    /// Runs the command; `true` if it changed anything
    pub fn apply(&self, engine: &Engine) -> bool {
        match *self {
            Command::Merge(Some(id)) => engine.merge(id),
            Command::Unmerge(Some(id)) => engine.unmerge(id),
            Command::Add {
                kind,
                source: Some(id),
                src: Some(src),
                dst,
            } => engine.add(kind, id, src, dst).is_some(),
            Command::Del {
                kind,
                dst: Some(dst),
            } => engine.remove(kind, dst),
            _ => {
                debug!("Command {:?} has no usable arguments", self);
                false
            }
        }
    }
}

fn kind_of(keyword: &str) -> ChannelKind {
    if keyword.ends_with("axis") {
        ChannelKind::Axis
    } else {
        ChannelKind::Button
    }
}

fn fingerprint(field: Option<&str>) -> Option<Fingerprint> {
    field?.parse().ok()
}

fn number(field: Option<&str>) -> Option<usize> {
    field?.parse().ok()
}

/// Write side of the control channel
#[derive(Clone)]
pub struct ControlProtocol {
    engine: Arc<Engine>,
}

impl ControlProtocol {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    /// Parses and applies one command; always reports the whole input consumed
    pub fn store(&self, input: &[u8]) -> usize {
        match Command::parse(input) {
            Ok(command) => {
                if command.apply(&self.engine) {
                    info!("Applied {:?}", command);
                } else {
                    debug!("{:?} had no effect", command);
                }
            }
            Err(e) => debug!("Rejected control command: {}", e),
        }

        input.len()
    }

    /// Human-readable status listing
    pub fn show(&self) -> String {
        self.engine.status().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_keyword() {
        assert_eq!(
            Command::parse(b"merge 111"),
            Ok(Command::Merge(Some(Fingerprint(111))))
        );
        assert_eq!(
            Command::parse(b"unmerge 222\n"),
            Ok(Command::Unmerge(Some(Fingerprint(222))))
        );
        assert_eq!(
            Command::parse(b"add_axis 222 2 4"),
            Ok(Command::Add {
                kind: ChannelKind::Axis,
                source: Some(Fingerprint(222)),
                src: Some(2),
                dst: Some(4),
            })
        );
        assert_eq!(
            Command::parse(b"  add_button 111 0"),
            Ok(Command::Add {
                kind: ChannelKind::Button,
                source: Some(Fingerprint(111)),
                src: Some(0),
                dst: None,
            })
        );
        assert_eq!(
            Command::parse(b"del_button 3"),
            Ok(Command::Del {
                kind: ChannelKind::Button,
                dst: Some(3),
            })
        );
        assert_eq!(
            Command::parse(b"del_axis\t0\n"),
            Ok(Command::Del {
                kind: ChannelKind::Axis,
                dst: Some(0),
            })
        );
    }

    #[test]
    fn trailing_garbage_rejects_command() {
        assert_eq!(
            Command::parse(b"merge 123abc"),
            Err(ParseError::UnexpectedCharacter('a'))
        );
        assert_eq!(
            Command::parse(b"add_axis 1 -2"),
            Err(ParseError::UnexpectedCharacter('-'))
        );
    }

    #[test]
    fn keyword_is_exact_and_case_sensitive() {
        assert!(matches!(
            Command::parse(b"Merge 1"),
            Err(ParseError::UnknownKeyword(_))
        ));
        assert!(matches!(
            Command::parse(b"merge1"),
            Err(ParseError::UnknownKeyword(_))
        ));
        assert_eq!(Command::parse(b"   \n"), Err(ParseError::Empty));
        assert_eq!(
            Command::parse(b"merge \n"),
            Err(ParseError::MissingArguments("merge"))
        );
    }

    #[test]
    fn unparsable_numbers_are_absent() {
        // larger than u64
        assert_eq!(
            Command::parse(b"merge 99999999999999999999999"),
            Ok(Command::Merge(None))
        );
        assert_eq!(
            Command::parse(b"add_button 5"),
            Ok(Command::Add {
                kind: ChannelKind::Button,
                source: Some(Fingerprint(5)),
                src: None,
                dst: None,
            })
        );
    }

    #[test]
    fn extra_tokens_are_ignored() {
        assert_eq!(
            Command::parse(b"del_axis 1 2 3"),
            Ok(Command::Del {
                kind: ChannelKind::Axis,
                dst: Some(1),
            })
        );
    }

    #[test]
    fn store_consumes_everything() {
        let (producer, _consumer) = crate::output::bounded(8);
        let engine = Arc::new(Engine::new(Default::default(), producer));
        let protocol = ControlProtocol::new(engine);
        assert_eq!(protocol.store(b"merge 123abc"), 12);
        assert_eq!(protocol.store(b"bogus"), 5);
        assert_eq!(protocol.store(&[0xff, 0xfe]), 2);
        assert_eq!(protocol.store(b"merge 1\n"), 8);
    }
}
