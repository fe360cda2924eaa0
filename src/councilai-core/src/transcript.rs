//! Transcript export for completed debates.

use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::CouncilError;
use crate::turn_graph::CompletedDebate;

/// Render a debate as a readable plain-text transcript.
pub fn render_text(debate: &CompletedDebate) -> String {
    let mut out = String::new();
    out.push_str("Council of Five - Transcript\n");
    out.push_str(&format!(
        "Date: {}\n",
        debate.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out.push_str(&format!("Question: {}\n", debate.question));
    out.push_str(&"=".repeat(60));
    out.push('\n');

    for record in &debate.records {
        out.push('\n');
        out.push_str(&format!(
            "{} {} [{}]\n",
            record.persona.emoji(),
            record.persona,
            record.kind.label()
        ));
        let text = record.text.trim();
        if text.is_empty() {
            out.push_str("(no transcript)\n");
        } else {
            out.push_str(text);
            out.push('\n');
        }
    }

    out
}

pub fn to_json(debate: &CompletedDebate) -> Result<String, CouncilError> {
    serde_json::to_string_pretty(debate)
        .map_err(|e| CouncilError::ConfigError(format!("Failed to serialize transcript: {}", e)))
}

/// Base filename (without extension) for a debate finished at `timestamp`.
pub fn transcript_filename(timestamp: &DateTime<Utc>) -> String {
    format!("council-{}", timestamp.format("%Y%m%d-%H%M%S"))
}

/// Write `<name>.txt` and `<name>.json` into `dir`, creating it if needed.
/// Returns the path of the text transcript.
pub fn save<P: AsRef<Path>>(debate: &CompletedDebate, dir: P) -> Result<PathBuf, CouncilError> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;

    let base = transcript_filename(&debate.timestamp);
    let text_path = dir.join(format!("{}.txt", base));
    fs::write(&text_path, render_text(debate))?;
    fs::write(dir.join(format!("{}.json", base)), to_json(debate)?)?;

    tracing::info!(path = %text_path.display(), "transcript saved");
    Ok(text_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::Persona;
    use crate::turn_graph::{TurnKind, TurnRecord};
    use chrono::TimeZone;

    fn debate() -> CompletedDebate {
        CompletedDebate {
            question: "Faut-il ralentir l'IA ?".to_string(),
            records: vec![
                TurnRecord {
                    persona: Persona::Nova,
                    kind: TurnKind::Main,
                    text: "Non, on accélère.".to_string(),
                },
                TurnRecord {
                    persona: Persona::Henri,
                    kind: TurnKind::Intervention,
                    text: "  ".to_string(),
                },
                TurnRecord {
                    persona: Persona::Nova,
                    kind: TurnKind::Closing,
                    text: "Verdict: Nova.".to_string(),
                },
            ],
            timestamp: Utc.with_ymd_and_hms(2026, 3, 14, 20, 5, 9).unwrap(),
        }
    }

    #[test]
    fn test_transcript_filename() {
        assert_eq!(transcript_filename(&debate().timestamp), "council-20260314-200509");
    }

    #[test]
    fn test_render_text_labels_every_record() {
        let text = render_text(&debate());
        assert!(text.contains("Date: 2026-03-14 20:05:09 UTC"));
        assert!(text.contains("Question: Faut-il ralentir l'IA ?"));
        assert!(text.contains("Nova [Main answer]\nNon, on accélère."));
        assert!(text.contains("Henri [Intervention]\n(no transcript)"));
        assert!(text.contains("Nova [Conclusion]\nVerdict: Nova."));
    }

    #[test]
    fn test_json_keeps_record_order() {
        let json = to_json(&debate()).unwrap();
        let back: CompletedDebate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, debate());
        assert!(json.contains("\"kind\": \"closing\""));
    }

    #[test]
    fn test_save_writes_both_files() {
        let dir = std::env::temp_dir().join(format!("councilai-test-{}", std::process::id()));
        let path = save(&debate(), &dir).unwrap();
        assert!(path.ends_with("council-20260314-200509.txt"));
        assert!(dir.join("council-20260314-200509.json").exists());
        fs::remove_dir_all(&dir).unwrap();
    }
}
