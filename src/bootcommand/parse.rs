use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use super::{InputEvent, KeyAction, KeystrokeSequence, SpecialKey};
use crate::error::TartbootError;

/// `<name>` or `<name X Y>`; anything else starting with `<` is literal.
static DIRECTIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^<([A-Za-z0-9]+)(?:\s+(\d+)\s+(\d+))?>").expect("valid directive regex")
});

const DEFAULT_WAIT: Duration = Duration::from_secs(1);

/// Parse a rendered boot command.
pub fn parse(command: &str) -> Result<KeystrokeSequence, TartbootError> {
    let mut events = Vec::new();
    let mut text = String::new();
    let mut pos = 0;

    while pos < command.len() {
        let rest = &command[pos..];
        if let Some(caps) = DIRECTIVE_RE.captures(rest) {
            if !text.is_empty() {
                events.push(InputEvent::Text(std::mem::take(&mut text)));
            }
            let coords = match (caps.get(2), caps.get(3)) {
                (Some(x), Some(y)) => Some((x.as_str(), y.as_str())),
                _ => None,
            };
            events.push(directive(&caps[1], coords, pos)?);
            pos += caps[0].len();
            continue;
        }

        let Some(c) = rest.chars().next() else { break };
        text.push(c);
        pos += c.len_utf8();
    }

    if !text.is_empty() {
        events.push(InputEvent::Text(text));
    }
    Ok(KeystrokeSequence::new(events))
}

fn directive(
    name: &str,
    coords: Option<(&str, &str)>,
    offset: usize,
) -> Result<InputEvent, TartbootError> {
    let error = |message: String| TartbootError::BootCommandParse { offset, message };
    let lower = name.to_ascii_lowercase();

    if lower == "click" {
        let (x, y) = coords.ok_or_else(|| error("`<click>` needs coordinates: `<click X Y>`".into()))?;
        let coord = |s: &str| {
            s.parse::<u16>()
                .map_err(|_| error(format!("click coordinate {s} is out of range")))
        };
        return Ok(InputEvent::Click {
            x: coord(x)?,
            y: coord(y)?,
        });
    }
    if coords.is_some() {
        return Err(error(format!("`<{name}>` takes no arguments")));
    }

    if let Some(spec) = lower.strip_prefix("wait") {
        let duration =
            parse_wait(spec).ok_or_else(|| error(format!("invalid wait duration in `<{name}>`")))?;
        return Ok(InputEvent::Wait(duration));
    }

    if let Some(key) = SpecialKey::from_name(&lower) {
        return Ok(InputEvent::Key {
            key,
            action: KeyAction::Press,
        });
    }
    let held = [("on", KeyAction::Down), ("off", KeyAction::Up)]
        .into_iter()
        .find_map(|(suffix, action)| {
            let key = SpecialKey::from_name(lower.strip_suffix(suffix)?)?;
            Some(InputEvent::Key { key, action })
        });

    held.ok_or_else(|| error(format!("unknown directive `<{name}>`")))
}

/// `""` is one second, bare digits are seconds, otherwise a sequence of
/// `<n><unit>` with units `h`, `m`, `s` and `ms`.
fn parse_wait(spec: &str) -> Option<Duration> {
    if spec.is_empty() {
        return Some(DEFAULT_WAIT);
    }
    if spec.bytes().all(|b| b.is_ascii_digit()) {
        return Some(Duration::from_secs(spec.parse().ok()?));
    }

    let mut total = Duration::ZERO;
    let mut rest = spec;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let n: u64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let part = match &rest[..unit_len] {
            "ms" => Duration::from_millis(n),
            "s" => Duration::from_secs(n),
            "m" => Duration::from_secs(n.checked_mul(60)?),
            "h" => Duration::from_secs(n.checked_mul(3600)?),
            _ => return None,
        };
        total = total.checked_add(part)?;
        rest = &rest[unit_len..];
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(key: SpecialKey) -> InputEvent {
        InputEvent::Key {
            key,
            action: KeyAction::Press,
        }
    }

    #[test]
    fn wait_text_enter() {
        let seq = parse("<wait5>root<enter>").unwrap();
        assert_eq!(seq.len(), 3);
        assert_eq!(
            seq.events(),
            &[
                InputEvent::Wait(Duration::from_secs(5)),
                InputEvent::Text("root".into()),
                press(SpecialKey::Enter),
            ]
        );
    }

    #[test]
    fn wait_forms() {
        let waits: Vec<_> = ["<wait>", "<wait10>", "<wait10s>", "<wait1m30s>", "<wait500ms>", "<wait1h>"]
            .iter()
            .map(|s| parse(s).unwrap().events()[0].clone())
            .collect();
        assert_eq!(
            waits,
            vec![
                InputEvent::Wait(Duration::from_secs(1)),
                InputEvent::Wait(Duration::from_secs(10)),
                InputEvent::Wait(Duration::from_secs(10)),
                InputEvent::Wait(Duration::from_secs(90)),
                InputEvent::Wait(Duration::from_millis(500)),
                InputEvent::Wait(Duration::from_secs(3600)),
            ]
        );
    }

    #[test]
    fn bad_wait_is_an_error() {
        let err = parse("abc<wait5x>").unwrap_err();
        match err {
            TartbootError::BootCommandParse { offset, .. } => assert_eq!(offset, 3),
            other => panic!("unexpected error: {other}"),
        }
        assert!(parse("<waitms>").is_err());
    }

    #[test]
    fn hold_and_release() {
        let seq = parse("<leftShiftOn>a<leftShiftOff><f1On>").unwrap();
        assert_eq!(
            seq.events(),
            &[
                InputEvent::Key {
                    key: SpecialKey::LeftShift,
                    action: KeyAction::Down
                },
                InputEvent::Text("a".into()),
                InputEvent::Key {
                    key: SpecialKey::LeftShift,
                    action: KeyAction::Up
                },
                InputEvent::Key {
                    key: SpecialKey::F(1),
                    action: KeyAction::Down
                },
            ]
        );
    }

    #[test]
    fn click_directive() {
        let seq = parse("<click 100 250><enter>").unwrap();
        assert_eq!(
            seq.events(),
            &[InputEvent::Click { x: 100, y: 250 }, press(SpecialKey::Enter)]
        );
        assert!(parse("<click>").is_err());
        assert!(parse("<click 1 70000>").is_err());
        assert!(parse("<enter 1 2>").is_err());
    }

    #[test]
    fn malformed_angle_brackets_are_literal() {
        let seq = parse("echo a<b && x <= 3 < y> <>").unwrap();
        assert_eq!(
            seq.events(),
            &[InputEvent::Text("echo a<b && x <= 3 < y> <>".into())]
        );
    }

    #[test]
    fn unknown_directive_is_fatal() {
        let err = parse("root<tab><bogus>").unwrap_err();
        assert!(matches!(err, TartbootError::BootCommandParse { offset: 9, .. }));
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn multibyte_text_is_kept_intact() {
        let seq = parse("héllo<spacebar>wörld").unwrap();
        assert_eq!(
            seq.events(),
            &[
                InputEvent::Text("héllo".into()),
                press(SpecialKey::Spacebar),
                InputEvent::Text("wörld".into()),
            ]
        );
    }

    #[test]
    fn parsing_is_pure() {
        let cmd = "<esc><wait2>linux inst.ks=http://10.0.0.5:8080/ks<enter><wait1m>";
        assert_eq!(parse(cmd).unwrap(), parse(cmd).unwrap());
    }

    #[test]
    fn empty_command() {
        assert!(parse("").unwrap().is_empty());
    }
}
