//! Archive-log filename parsing and directory scanning (spec.md §4.7 step 1),
//! grounded on `original_source/src/replicator/Replicator.cpp`'s
//! `getSequenceFromFileName`.

use std::path::{Path, PathBuf};

use glob::glob;

/// Extracts the sequence number encoded in `file` per `log_archive_format`'s
/// wildcards — `%s`/`%S` sequence, `%t`/`%T` thread, `%r` resetlogs, `%a`
/// activation, `%d` database, `%h` an opaque alphanumeric hash — walking
/// both strings in lockstep the way the original does. Any mismatch (a
/// literal that doesn't line up, a wildcard with nothing to consume, a
/// shorter or longer match than the whole filename) means `file` isn't a
/// candidate at all, not a fatal error, so the caller just skips it.
pub fn sequence_from_filename(format: &str, file: &str) -> Option<u32> {
    let format = format.as_bytes();
    let file = file.as_bytes();
    let (mut i, mut j) = (0usize, 0usize);
    let mut sequence = 0u32;

    while i < format.len() && j < file.len() {
        if format[i] == b'%' {
            let marker = *format.get(i + 1)?;
            let mut digits = 0usize;
            match marker {
                b's' | b'S' | b't' | b'T' | b'r' | b'a' | b'd' => {
                    let mut number: u32 = 0;
                    while j < file.len() && file[j].is_ascii_digit() {
                        number = number.saturating_mul(10).saturating_add((file[j] - b'0') as u32);
                        j += 1;
                        digits += 1;
                    }
                    if marker == b's' || marker == b'S' {
                        sequence = number;
                    }
                    i += 2;
                }
                b'h' => {
                    while j < file.len() && (file[j].is_ascii_digit() || file[j].is_ascii_lowercase()) {
                        j += 1;
                        digits += 1;
                    }
                    i += 2;
                }
                _ => return None,
            }
            if digits == 0 {
                return None;
            }
        } else if format[i] == file[j] {
            i += 1;
            j += 1;
        } else {
            return None;
        }
    }

    (i == format.len() && j == file.len()).then_some(sequence)
}

/// Turns `log_archive_format` into a glob pattern (every wildcard becomes
/// `*`) for a cheap first-pass directory scan; exact sequences are then
/// pulled out of each match by [`sequence_from_filename`].
fn glob_pattern(dir: &Path, format: &str) -> String {
    let bytes = format.as_bytes();
    let mut out = String::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 1 < bytes.len() {
            out.push('*');
            i += 2;
        } else {
            out.push(bytes[i] as char);
            i += 1;
        }
    }
    dir.join(out).to_string_lossy().into_owned()
}

/// Scans `dir` for files matching `format`, returning `(sequence, path)`
/// pairs sorted ascending (spec.md §4.7 step 1: "scan the archive-log
/// directory ..., extract the sequence, and sort ascending").
pub fn scan_archive_dir(dir: &Path, format: &str) -> Vec<(u32, PathBuf)> {
    let pattern = glob_pattern(dir, format);
    let mut found = Vec::new();
    let Ok(entries) = glob(&pattern) else {
        return found;
    };
    for entry in entries.flatten() {
        let Some(name) = entry.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(sequence) = sequence_from_filename(format, name) {
            found.push((sequence, entry));
        }
    }
    found.sort_by_key(|(seq, _)| *seq);
    found
}
