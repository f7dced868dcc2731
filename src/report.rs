//! Report files for unattended batch runs.
//!
//! Plain text, one section per face:
//! - `filled: yes|no`
//! - `summary: <one line>`
//! - `[front]` followed by the grid rows
//! - `[back]` followed by the grid rows (two-sided sheets only)

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

use crate::worker::JobResult;

const FRONT_HEADER: &str = "[front]";
const BACK_HEADER: &str = "[back]";

/// Writes `result` to `path`, replacing any previous report.
pub fn save(path: &Path, result: &JobResult) -> io::Result<()> {
    let mut file = File::create(path)?;
    writeln!(file, "filled: {}", if result.filled { "yes" } else { "no" })?;
    writeln!(file, "summary: {}", result.summary)?;
    writeln!(file, "{FRONT_HEADER}")?;
    write_rows(&mut file, &result.front)?;
    if let Some(back) = &result.back {
        writeln!(file, "{BACK_HEADER}")?;
        write_rows(&mut file, back)?;
    }
    Ok(())
}

fn write_rows(file: &mut File, grid: &str) -> io::Result<()> {
    for row in grid.lines().filter(|row| !row.trim().is_empty()) {
        writeln!(file, "{}", row.trim_end())?;
    }
    Ok(())
}

/// Reads a report written by [`save`]. Returns `None` if the file is
/// missing or malformed.
pub fn load(path: &Path) -> Option<JobResult> {
    let file = File::open(path).ok()?;
    let mut lines = BufReader::new(file).lines();

    let filled = match lines.next()?.ok()?.strip_prefix("filled: ")? {
        "yes" => true,
        "no" => false,
        _ => return None,
    };
    let summary = lines.next()?.ok()?.strip_prefix("summary: ")?.to_owned();
    if lines.next()?.ok()? != FRONT_HEADER {
        return None;
    }

    let mut front = String::new();
    let mut back: Option<String> = None;
    for line in lines {
        let line = line.ok()?;
        if line == BACK_HEADER {
            back = Some(String::new());
            continue;
        }
        let section = back.as_mut().unwrap_or(&mut front);
        section.push_str(&line);
        section.push('\n');
    }

    Some(JobResult {
        filled,
        summary,
        front,
        back,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("tetropack-{}-{name}", std::process::id()))
    }

    #[test]
    fn test_report_roundtrip_two_faces() {
        let path = scratch("dual.txt");
        let result = JobResult {
            filled: true,
            summary: "filled by backtracking in 1.00ms (round 1, 3 attempts)".to_owned(),
            front: "AAAB\nABBB\n".to_owned(),
            back: Some("BAAA\nBBBA\n".to_owned()),
        };
        save(&path, &result).unwrap();
        assert_eq!(load(&path), Some(result));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_report_single_face_text() {
        let path = scratch("single.txt");
        let result = JobResult {
            filled: false,
            summary: "no packing found".to_owned(),
            front: "..\n..\n".to_owned(),
            back: None,
        };
        save(&path, &result).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        insta::assert_snapshot!(text.trim_end(), @r"
        filled: no
        summary: no packing found
        [front]
        ..
        ..
        ");
        assert_eq!(load(&path), Some(result));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_report() {
        assert_eq!(load(&scratch("does-not-exist.txt")), None);
    }
}
