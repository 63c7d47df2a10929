//! User-supplied covariate files keyed by input file basename.

use super::{provenance, FixedCovariate, Gender, InbredPenalty};
use crate::error::{GenoError, Result};
use crate::samples::SampleSet;
use log::{debug, info};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Accepts `male`/`m`/`1`, `female`/`f`/`2` and `unknown`/`u`/`0`/`-1`,
/// ignoring case.
pub fn parse_gender_token(token: &str) -> Option<Gender> {
    match token.trim().to_ascii_lowercase().as_str() {
        "male" | "m" | "1" => Some(Gender::Male),
        "female" | "f" | "2" => Some(Gender::Female),
        "unknown" | "u" | "0" | "-1" => Some(Gender::Unknown),
        _ => None,
    }
}

fn parse_penalty(token: &str) -> Option<InbredPenalty> {
    token
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}

/// Reads `basename<TAB>value` lines and returns one value per sample.
/// Every sample must be present exactly once.
fn read_keyed_values<T>(
    path: &Path,
    samples: &SampleSet,
    what: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Vec<T>> {
    let file = File::open(path).map_err(|e| GenoError::io(path, e))?;
    let mut by_name: HashMap<String, T> = HashMap::new();
    for (line_idx, line_result) in BufReader::new(file).lines().enumerate() {
        let line_num = line_idx + 1;
        let line = line_result.map_err(|e| GenoError::io(path, e))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("cel_files") {
            continue;
        }
        let mut fields = trimmed.split('\t');
        let key = fields.next().unwrap_or("").trim();
        let token = fields.next().ok_or_else(|| {
            GenoError::parse(path, line_num, format!("expected '<file>\\t<{}>'", what))
        })?;
        let value = parse(token).ok_or_else(|| {
            GenoError::parse(path, line_num, format!("bad {} value '{}'", what, token.trim()))
        })?;
        // Entries may name a path; match on the basename.
        let basename = Path::new(key)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| key.to_string());
        if by_name.insert(basename.clone(), value).is_some() {
            return Err(GenoError::data_integrity(format!(
                "{} lists sample '{}' more than once.",
                path.display(),
                basename
            )));
        }
    }

    let mut values = Vec::with_capacity(samples.len());
    for sample in samples.iter() {
        match by_name.remove(&sample.name) {
            Some(v) => values.push(v),
            None => {
                return Err(GenoError::data_integrity(format!(
                    "{} has no {} entry for sample '{}'.",
                    path.display(),
                    what,
                    sample.name
                )))
            }
        }
    }
    if !by_name.is_empty() {
        debug!(
            "{} has {} entries for files not in this run.",
            path.display(),
            by_name.len()
        );
    }
    Ok(values)
}

pub fn read_gender_file(path: &Path, samples: &SampleSet) -> Result<FixedCovariate<Gender>> {
    let values = read_keyed_values(path, samples, "gender", parse_gender_token)?;
    info!("Read genders for {} samples from {}.", values.len(), path.display());
    Ok(FixedCovariate::new(
        provenance::USER_SUPPLIED,
        format!("genders read from {}", path.display()),
        values,
    ))
}

pub fn read_inbred_file(path: &Path, samples: &SampleSet) -> Result<FixedCovariate<InbredPenalty>> {
    let values = read_keyed_values(path, samples, "inbred penalty", parse_penalty)?;
    info!(
        "Read inbred penalties for {} samples from {}.",
        values.len(),
        path.display()
    );
    Ok(FixedCovariate::new(
        provenance::USER_SUPPLIED,
        format!("inbred penalties read from {}", path.display()),
        values,
    ))
}

#[cfg(test)]
mod tests {
    use super::super::CovariateSource;
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn samples() -> SampleSet {
        SampleSet::new(vec![
            PathBuf::from("in/s1.gcin"),
            PathBuf::from("in/s2.gcin"),
            PathBuf::from("in/s3.gcin"),
        ])
        .unwrap()
    }

    fn write(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        for l in lines {
            writeln!(f, "{}", l).unwrap();
        }
        f.flush().unwrap();
        f
    }

    #[test]
    fn test_tokens() {
        assert_eq!(parse_gender_token("MALE"), Some(Gender::Male));
        assert_eq!(parse_gender_token("2"), Some(Gender::Female));
        assert_eq!(parse_gender_token(" f "), Some(Gender::Female));
        assert_eq!(parse_gender_token("0"), Some(Gender::Unknown));
        assert_eq!(parse_gender_token("x"), None);
    }

    #[test]
    fn test_gender_file_follows_sample_order() {
        let f = write(&["cel_files\tgender", "s3.gcin\tmale", "/other/dir/s1.gcin\tFemale", "s2.gcin\t1", "extra.gcin\t2"]);
        let cov = read_gender_file(f.path(), &samples()).unwrap();
        assert_eq!(cov.values(), &[Gender::Female, Gender::Male, Gender::Male]);
        assert_eq!(cov.name(), provenance::USER_SUPPLIED);
    }

    #[test]
    fn test_missing_sample_is_fatal() {
        let f = write(&["s1.gcin\tmale", "s2.gcin\tfemale"]);
        assert!(matches!(
            read_gender_file(f.path(), &samples()),
            Err(GenoError::DataIntegrity { .. })
        ));
    }

    #[test]
    fn test_duplicate_entry_is_fatal() {
        let f = write(&["s1.gcin\tmale", "s1.gcin\tmale", "s2.gcin\tfemale", "s3.gcin\tmale"]);
        assert!(read_gender_file(f.path(), &samples()).is_err());
    }

    #[test]
    fn test_bad_token_reports_line() {
        let f = write(&["s1.gcin\tmale", "s2.gcin\tboth"]);
        match read_gender_file(f.path(), &samples()) {
            Err(GenoError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_inbred_file() {
        let f = write(&["s1.gcin\t0.5", "s2.gcin\t0", "s3.gcin\t1.25"]);
        let cov = read_inbred_file(f.path(), &samples()).unwrap();
        assert_eq!(cov.values(), &[0.5, 0.0, 1.25]);

        let bad = write(&["s1.gcin\t-1", "s2.gcin\t0", "s3.gcin\t0"]);
        assert!(read_inbred_file(bad.path(), &samples()).is_err());
    }
}
