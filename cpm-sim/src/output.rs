//! CSV serialization of the simulation curves.
//!
//! Both curves are rendered fully in memory with fixed-precision values and
//! then written atomically (temporary file plus rename), so a partially
//! written artifact can never be observed.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::info;

use crate::simulation::SimulationCurves;

/// The file name of the learning-curve artifact.
pub const LEARNING_CURVE_FILE: &str = "learning_curve.csv";
/// The file name of the regret-curve artifact.
pub const REGRET_CURVE_FILE: &str = "regret_curve.csv";

const LINUCB_METHOD: &str = "linucb";
const RANDOM_METHOD: &str = "random";

#[derive(Debug, Error)]
/// An error related to writing the curve artifacts.
pub enum OutputError {
    #[error("writing curve artifact failed: {0}")]
    Io(#[from] io::Error),
}

/// Writes `learning_curve.csv` and `regret_curve.csv` into `dir`.
///
/// Values are rounded to `precision` decimal digits so that artifacts are
/// byte-identical across environments. Returns the paths of the written
/// files.
///
/// # Errors
/// Fails if the directory cannot be created or a file cannot be written.
pub fn write_curves(
    curves: &SimulationCurves,
    dir: &Path,
    precision: usize,
) -> Result<Vec<PathBuf>, OutputError> {
    fs::create_dir_all(dir)?;

    let learning = render_csv(
        "mean_pass_at_1",
        &curves.linucb.learning,
        &curves.random.learning,
        precision,
    );
    let regret = render_csv(
        "cumulative_regret",
        &curves.linucb.regret,
        &curves.random.regret,
        precision,
    );

    let learning_path = dir.join(LEARNING_CURVE_FILE);
    let regret_path = dir.join(REGRET_CURVE_FILE);
    write_atomically(&learning_path, &learning)?;
    write_atomically(&regret_path, &regret)?;
    info!(dir = %dir.display(), "wrote curve artifacts");
    Ok(vec![learning_path, regret_path])
}

/// Renders one curve file: a header and one row per round per method, the
/// bandit rows first.
fn render_csv(value_column: &str, linucb: &[f64], random: &[f64], precision: usize) -> String {
    let mut csv = format!("round,method,{}\n", value_column);
    for (method, series) in &[(LINUCB_METHOD, linucb), (RANDOM_METHOD, random)] {
        for (index, value) in series.iter().enumerate() {
            csv.push_str(&format!(
                "{},{},{:.prec$}\n",
                index + 1,
                method,
                value,
                prec = precision,
            ));
        }
    }
    csv
}

/// Writes `contents` to a sibling temporary file, then renames it over
/// `path`.
fn write_atomically(path: &Path, contents: &str) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::MethodCurves;

    fn test_curves() -> SimulationCurves {
        SimulationCurves {
            linucb: MethodCurves {
                learning: vec![0.1, 0.2],
                regret: vec![0.5, 0.75],
            },
            random: MethodCurves {
                learning: vec![0.1, 0.15],
                regret: vec![1., 2.],
            },
        }
    }

    #[test]
    fn test_render_rows_and_header() {
        let curves = test_curves();
        let csv = render_csv(
            "mean_pass_at_1",
            &curves.linucb.learning,
            &curves.random.learning,
            6,
        );
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "round,method,mean_pass_at_1");
        assert_eq!(lines[1], "1,linucb,0.100000");
        assert_eq!(lines[2], "2,linucb,0.200000");
        assert_eq!(lines[3], "1,random,0.100000");
        assert_eq!(lines[4], "2,random,0.150000");
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn test_precision_is_respected() {
        let csv = render_csv("cumulative_regret", &[1. / 3.], &[2. / 3.], 2);
        assert!(csv.contains("1,linucb,0.33"));
        assert!(csv.contains("1,random,0.67"));
    }

    #[test]
    fn test_write_curves_creates_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_curves(&test_curves(), dir.path(), 6).unwrap();
        assert_eq!(paths.len(), 2);
        for path in &paths {
            assert!(path.is_file());
        }
        assert!(dir.path().join(LEARNING_CURVE_FILE).is_file());
        assert!(dir.path().join(REGRET_CURVE_FILE).is_file());
        // no stray temporary files left behind
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }
}
