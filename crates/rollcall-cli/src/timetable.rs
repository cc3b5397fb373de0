//! Timetable files.
//!
//! A timetable is a TOML document with one `[[session]]` table per class:
//!
//! ```toml
//! [[session]]
//! id = 1
//! name = "Physics"
//! code = "PHY101"
//! department = "Science"
//! start = "09:00"
//! end = "12:00"
//! ```

use rollcall_core::Session;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct TimetableFile {
    #[serde(default, rename = "session")]
    sessions: Vec<Session>,
}

/// Parse a timetable, rejecting any session whose window is inverted.
pub fn parse(src: &str) -> anyhow::Result<Vec<Session>> {
    let file: TimetableFile = toml::from_str(src)?;
    for session in &file.sessions {
        session.validate()?;
    }
    Ok(file.sessions)
}

pub fn load(path: &Path) -> anyhow::Result<Vec<Session>> {
    let src = std::fs::read_to_string(path)?;
    parse(&src)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    #[test]
    fn test_parse_sessions() {
        let sessions = parse(
            r#"
            [[session]]
            id = 1
            name = "Physics"
            code = "PHY101"
            department = "Science"
            start = "09:00"
            end = "12:00"

            [[session]]
            id = 2
            name = "Maths"
            start = "12:00:00"
            end = "14:00:00"
            "#,
        )
        .unwrap();

        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].code.as_deref(), Some("PHY101"));
        assert_eq!(sessions[1].start, NaiveTime::from_hms_opt(12, 0, 0).unwrap());
        assert!(sessions[1].department.is_none());
    }

    #[test]
    fn test_empty_timetable() {
        assert!(parse("").unwrap().is_empty());
    }

    #[test]
    fn test_inverted_window_rejected() {
        let err = parse(
            r#"
            [[session]]
            id = 9
            name = "Backwards"
            start = "15:00"
            end = "14:00"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("session 9"));
    }
}
