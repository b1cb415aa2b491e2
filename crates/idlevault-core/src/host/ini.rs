use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use tracing::info;

use crate::error::{IdlevaultError, Result};

/// Find the host's ini file under `install_dir`: `ini_name` first, then the
/// usual capitalisations, then the `tally/` subdirectory some installs use.
pub fn locate_ini(install_dir: &Path, ini_name: &str) -> Result<PathBuf> {
    let mut names = vec![PathBuf::from(ini_name)];
    for alt in [
        PathBuf::from("tally.ini"),
        PathBuf::from("Tally.ini"),
        Path::new("tally").join("tally.ini"),
    ] {
        if !names.contains(&alt) {
            names.push(alt);
        }
    }
    for name in &names {
        let candidate = install_dir.join(name);
        if candidate.is_file() {
            info!(ini = %candidate.display(), "found host configuration");
            return Ok(candidate);
        }
    }
    Err(IdlevaultError::Startup(format!(
        "no {} found in '{}'",
        names
            .iter()
            .map(|n| n.display().to_string())
            .collect::<Vec<_>>()
            .join(" or "),
        install_dir.display()
    )))
}

/// Read the `Data` entry from the host's ini file.
///
/// The key may sit inside any `[section]` or on a bare line; the first
/// non-empty value wins. Separators are normalised for this platform.
pub fn read_data_root(ini_path: &Path) -> Result<String> {
    let bytes = std::fs::read(ini_path).map_err(|e| {
        IdlevaultError::Startup(format!("cannot read '{}': {e}", ini_path.display()))
    })?;
    let text = String::from_utf8_lossy(&bytes);

    find_data_value(&text)
        .map(|raw| normalize_separators(&raw))
        .ok_or_else(|| {
            IdlevaultError::Startup(format!(
                "no Data entry in '{}'",
                ini_path.display()
            ))
        })
}

fn find_data_value(text: &str) -> Option<String> {
    for line in text.lines() {
        let line = line.trim().trim_start_matches('\u{feff}');
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') || line.starts_with('[') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if !key.trim().eq_ignore_ascii_case("data") {
            continue;
        }
        let value = value.trim().trim_matches('"').trim();
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }
    None
}

/// Collapse doubled separators and use the platform separator throughout,
/// keeping a leading `\\` (UNC share) intact.
pub fn normalize_separators(raw: &str) -> String {
    let is_sep = |c: char| c == '\\' || c == '/';
    let unc = raw.len() >= 2 && raw.chars().take(2).all(is_sep);
    let body = if unc { &raw[2..] } else { raw };

    let mut out = String::with_capacity(raw.len());
    if unc {
        out.push(MAIN_SEPARATOR);
        out.push(MAIN_SEPARATOR);
    }
    let mut prev_sep = false;
    for c in body.chars() {
        if is_sep(c) {
            if !prev_sep {
                out.push(MAIN_SEPARATOR);
            }
            prev_sep = true;
        } else {
            out.push(c);
            prev_sep = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sep(s: &str) -> String {
        s.replace('/', &MAIN_SEPARATOR.to_string())
    }

    #[test]
    fn data_in_section() {
        let text = "[Tally]\nUser TDL=No\nData=C:\\\\TallyPrime\\\\Data\n";
        assert_eq!(find_data_value(text).as_deref(), Some("C:\\\\TallyPrime\\\\Data"));
    }

    #[test]
    fn bare_data_line_and_comments() {
        let text = "; comment\n# Data=ignored\nLanguage=English\n Data = D:/Tally/Data \n";
        assert_eq!(find_data_value(text).as_deref(), Some("D:/Tally/Data"));
    }

    #[test]
    fn empty_or_missing_value() {
        assert_eq!(find_data_value("Data=\nData=\"\"\n"), None);
        assert_eq!(find_data_value("[Tally]\nExport=C:\\x\n"), None);
        assert_eq!(find_data_value("DataPath=C:\\x\n"), None);
    }

    #[test]
    fn separators_normalised() {
        assert_eq!(normalize_separators("C:\\\\TallyPrime\\\\Data"), sep("C:/TallyPrime/Data"));
        assert_eq!(normalize_separators("C:/TallyPrime\\Data"), sep("C:/TallyPrime/Data"));
        assert_eq!(normalize_separators("\\\\server\\tally\\data"), sep("//server/tally/data"));
    }

    #[test]
    fn reads_file_and_locates_ini() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Tally.ini"), "[Tally]\nData=/srv/tally//data\n").unwrap();

        let ini = locate_ini(dir.path(), "tally.ini").unwrap();
        assert_eq!(read_data_root(&ini).unwrap(), sep("/srv/tally/data"));
    }

    #[test]
    fn ini_in_tally_subdirectory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("tally")).unwrap();
        let nested = dir.path().join("tally").join("tally.ini");
        std::fs::write(&nested, "Data=/srv/data\n").unwrap();

        assert_eq!(locate_ini(dir.path(), "tally.ini").unwrap(), nested);

        std::fs::write(dir.path().join("tally.ini"), "Data=/srv/top\n").unwrap();
        assert_eq!(
            locate_ini(dir.path(), "tally.ini").unwrap(),
            dir.path().join("tally.ini")
        );
    }

    #[test]
    fn missing_key_and_file_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(locate_ini(dir.path(), "tally.ini").is_err());

        let ini = dir.path().join("tally.ini");
        std::fs::write(&ini, "[Tally]\nLanguage=English\n").unwrap();
        assert!(read_data_root(&ini).is_err());
        assert!(read_data_root(&dir.path().join("nope.ini")).is_err());
    }
}
