//! SRT detection and SRT → ASS conversion.
//!
//! Used by the subtitle rewriter when `subtitle.srt2ass` is enabled. The
//! transform is a pure byte function: non-SRT input is left to the
//! caller untouched.

const ASS_HEADER: &str = "[Script Info]\n\
ScriptType: v4.00+\n\
WrapStyle: 0\n\
ScaledBorderAndShadow: yes\n\
YCbCr Matrix: TV.601\n\
\n\
[V4+ Styles]\n\
Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding\n";

const DEFAULT_STYLE: &str = "Style: Default,Arial,20,&H00FFFFFF,&H000000FF,&H00000000,&H00000000,0,0,0,0,100,100,0,0,1,2,1,2,10,10,10,1\n";

const EVENTS_HEADER: &str = "\n[Events]\n\
Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\n";

/// Heuristic SRT detection: first block starts with a counter line
/// followed by a `-->` timing line.
pub fn is_srt(data: &[u8]) -> bool {
    let text = String::from_utf8_lossy(data);
    let mut lines = text
        .lines()
        .map(|line| line.trim_start_matches('\u{feff}').trim())
        .skip_while(|line| line.is_empty());
    match (lines.next(), lines.next()) {
        (Some(counter), Some(timing)) => {
            counter.parse::<u64>().is_ok() && timing.contains("-->")
        }
        _ => false,
    }
}

/// Convert an SRT document into ASS with the configured style lines.
///
/// Invalid blocks are skipped rather than failing the whole document.
pub fn srt_to_ass(data: &[u8], styles: &[String]) -> Vec<u8> {
    let text = String::from_utf8_lossy(data);
    let mut out = String::with_capacity(text.len() + 512);
    out.push_str(ASS_HEADER);
    if styles.is_empty() {
        out.push_str(DEFAULT_STYLE);
    } else {
        for style in styles {
            out.push_str(style);
            out.push('\n');
        }
    }
    out.push_str(EVENTS_HEADER);

    for block in text.replace("\r\n", "\n").split("\n\n") {
        let mut lines = block.lines().map(str::trim).skip_while(|l| l.is_empty());
        let Some(first) = lines.next() else { continue };
        // The counter line is optional in sloppy files.
        let timing = if first.contains("-->") {
            first
        } else {
            match lines.next() {
                Some(line) if line.contains("-->") => line,
                _ => continue,
            }
        };
        let Some((start, end)) = parse_timing(timing) else {
            continue;
        };
        let text: Vec<&str> = lines.collect();
        if text.is_empty() {
            continue;
        }
        let dialogue = strip_markup(&text.join("\\N"));
        out.push_str(&format!(
            "Dialogue: 0,{start},{end},Default,,0,0,0,,{dialogue}\n"
        ));
    }

    out.into_bytes()
}

/// "00:01:02,345 --> 00:01:04,000" → ("0:01:02.34", "0:01:04.00").
fn parse_timing(line: &str) -> Option<(String, String)> {
    let (start, end) = line.split_once("-->")?;
    Some((srt_time_to_ass(start.trim())?, srt_time_to_ass(end.trim())?))
}

fn srt_time_to_ass(value: &str) -> Option<String> {
    let (hms, millis) = value.split_once(',').unwrap_or((value, "0"));
    let mut parts = hms.split(':');
    let hours: u32 = parts.next()?.trim().parse().ok()?;
    let minutes: u32 = parts.next()?.trim().parse().ok()?;
    let seconds: u32 = parts.next()?.trim().parse().ok()?;
    let centis = millis.trim().parse::<u32>().ok()? / 10;
    Some(format!("{hours}:{minutes:02}:{seconds:02}.{centis:02}"))
}

/// Drop HTML-ish tags SRT allows; ASS has its own override syntax.
fn strip_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for ch in text.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[u8] = b"1\n00:00:01,000 --> 00:00:02,500\nHello <i>world</i>\nsecond line\n\n2\n00:00:03,000 --> 00:00:04,000\nBye\n";

    #[test]
    fn test_is_srt() {
        assert!(is_srt(SAMPLE));
        assert!(!is_srt(b"WEBVTT\n\n00:01.000 --> 00:02.000\nhi\n"));
        assert!(!is_srt(b"[Script Info]\nScriptType: v4.00+\n"));
        assert!(!is_srt(b""));
    }

    #[test]
    fn test_srt_to_ass_dialogue() {
        let ass = String::from_utf8(srt_to_ass(SAMPLE, &[])).unwrap();
        assert!(ass.starts_with("[Script Info]"));
        assert!(ass.contains("[V4+ Styles]"));
        assert!(ass.contains(
            "Dialogue: 0,0:00:01.00,0:00:02.50,Default,,0,0,0,,Hello world\\Nsecond line"
        ));
        assert!(ass.contains("Dialogue: 0,0:00:03.00,0:00:04.00,Default,,0,0,0,,Bye"));
    }

    #[test]
    fn test_custom_style_lines() {
        let styles = vec!["Style: Mine,Noto,24".to_string()];
        let ass = String::from_utf8(srt_to_ass(SAMPLE, &styles)).unwrap();
        assert!(ass.contains("Style: Mine,Noto,24"));
        assert!(!ass.contains("Style: Default,Arial"));
    }

    #[test]
    fn test_malformed_block_skipped() {
        let srt = b"1\nnot a timing line\ntext\n\n2\n00:00:05,000 --> 00:00:06,000\nok\n";
        let ass = String::from_utf8(srt_to_ass(srt, &[])).unwrap();
        assert_eq!(ass.matches("Dialogue:").count(), 1);
        assert!(ass.contains(",ok"));
    }
}
