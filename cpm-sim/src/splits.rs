//! Deterministic generation of per-client dataset splits.
//!
//! Consumes two externally supplied line-delimited JSON datasets and a
//! roster specification, and emits per-client train/validation id lists
//! plus a global test list. Clients receive a non-IID mixture of the two
//! dataset sources, allocated by Dirichlet-distributed proportions with a
//! small concentration parameter. Sampling is without replacement and fails
//! up front when the pool cannot cover the roster's demands.

use std::{
    cmp::Ordering,
    collections::HashSet,
    fs, io,
    io::BufRead,
    path::{Path, PathBuf},
};

use rand::{seq::SliceRandom, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_distr::{Dirichlet, Distribution};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
/// Errors related to split generation.
pub enum SplitError {
    #[error(
        "insufficient dataset size: pool={pool} required={required} \
         (train={train}, val={val}, test={test})"
    )]
    InsufficientData {
        pool: usize,
        required: usize,
        train: usize,
        val: usize,
        test: usize,
    },

    #[error("the Dirichlet concentration must be strictly positive, got {0}")]
    InvalidConcentration(f64),

    #[error("the roster contains no clients")]
    EmptyRoster,

    #[error("reading input failed: {0}")]
    Io(#[from] io::Error),

    #[error("parsing input failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The dataset a pool item originates from.
pub enum DataSource {
    HumanEval,
    Mbpp,
}

impl DataSource {
    /// Gets the prefix used for generated fallback ids.
    pub fn prefix(self) -> &'static str {
        match self {
            DataSource::HumanEval => "he",
            DataSource::Mbpp => "mbpp",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One problem of the combined dataset pool.
pub struct PoolItem {
    pub id: String,
    pub source: DataSource,
}

#[derive(Debug, Deserialize)]
/// One client of the roster specification.
pub struct RosterClient {
    pub id: String,
    #[serde(default)]
    pub train_samples: usize,
    #[serde(default)]
    pub val_samples: usize,
}

#[derive(Debug, Deserialize)]
/// The roster specification: which clients exist and how many samples each
/// of them receives.
pub struct Roster {
    pub clients: Vec<RosterClient>,
}

impl Roster {
    /// Loads a roster from a JSON file.
    ///
    /// # Errors
    /// Fails if the file cannot be read or is not a valid roster document.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SplitError> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

#[derive(Debug, Clone, Copy)]
/// Parameters of the split allocation.
pub struct SplitConfig {
    /// Seed of the allocation's generator.
    pub seed: u64,
    /// Size of the global test set.
    pub global_test_size: usize,
    /// Dirichlet concentration of the per-client source mixture. Small
    /// values make the clients' distributions strongly heterogeneous.
    pub concentration: f64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            global_test_size: 116,
            concentration: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// The generated splits, in roster order.
pub struct SplitPlan {
    pub train: Vec<(String, Vec<String>)>,
    pub val: Vec<(String, Vec<String>)>,
    pub test: Vec<String>,
}

/// Reads one JSONL dataset into pool items.
///
/// Ids are taken from the first of the `task_id`, `id`, `problem_id` fields
/// that is present; integer ids and missing ids are turned into generated
/// `<prefix>_<n>` ids. Malformed lines are skipped.
///
/// # Errors
/// Fails if the file cannot be read.
pub fn read_pool(path: impl AsRef<Path>, source: DataSource) -> Result<Vec<PoolItem>, SplitError> {
    let file = fs::File::open(path.as_ref())?;
    let mut items = Vec::new();
    for (index, line) in io::BufReader::new(file).lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(object) => items.push(PoolItem {
                id: item_id(&object, source, index),
                source,
            }),
            Err(_) => {
                warn!(path = %path.as_ref().display(), line = index + 1, "skipping malformed line");
            }
        }
    }
    Ok(items)
}

fn item_id(object: &Value, source: DataSource, index: usize) -> String {
    for key in &["task_id", "id", "problem_id"] {
        match object.get(*key) {
            Some(Value::String(id)) if !id.is_empty() => return id.clone(),
            Some(Value::Number(n)) if n.is_i64() || n.is_u64() => {
                return format!("{}_{}", source.prefix(), n);
            }
            _ => continue,
        }
    }
    format!("{}_{}", source.prefix(), index)
}

/// Merges dataset pools, dropping items whose id was already seen.
pub fn merge_pools(pools: Vec<Vec<PoolItem>>) -> Vec<PoolItem> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for item in pools.into_iter().flatten() {
        if seen.insert(item.id.clone()) {
            merged.push(item);
        }
    }
    merged
}

/// Allocates per-client train/validation splits and the global test set.
///
/// The allocation is fully determined by the pool contents, the roster, and
/// the configuration.
///
/// # Errors
/// Fails before allocating anything when the pool is smaller than the
/// roster plus test set demands, when the concentration is not strictly
/// positive, or when the roster is empty.
pub fn generate_splits(
    pool: &[PoolItem],
    roster: &Roster,
    config: &SplitConfig,
) -> Result<SplitPlan, SplitError> {
    if roster.clients.is_empty() {
        return Err(SplitError::EmptyRoster);
    }
    if !(config.concentration > 0.) {
        return Err(SplitError::InvalidConcentration(config.concentration));
    }

    let train: usize = roster.clients.iter().map(|c| c.train_samples).sum();
    let val: usize = roster.clients.iter().map(|c| c.val_samples).sum();
    let test = config.global_test_size;
    let required = train + val + test;
    if pool.len() < required {
        return Err(SplitError::InsufficientData {
            pool: pool.len(),
            required,
            train,
            val,
            test,
        });
    }

    let mut rng = ChaCha20Rng::seed_from_u64(config.seed);
    let mut source_pools = partition_by_source(pool);
    for source_pool in source_pools.iter_mut() {
        source_pool.shuffle(&mut rng);
    }

    let mut plan = SplitPlan {
        train: Vec::with_capacity(roster.clients.len()),
        val: Vec::with_capacity(roster.clients.len()),
        test: Vec::new(),
    };
    for client in &roster.clients {
        // one mixture per client: its train and val lists follow the same
        // source proportions
        let proportions = draw_proportions(source_pools.len(), config, &mut rng)?;
        let ids = allocate(&mut source_pools, client.train_samples, &proportions);
        plan.train.push((client.id.clone(), ids));
        let ids = allocate(&mut source_pools, client.val_samples, &proportions);
        plan.val.push((client.id.clone(), ids));
    }

    let mut remainder: Vec<String> = source_pools.into_iter().flatten().collect();
    remainder.shuffle(&mut rng);
    remainder.truncate(test);
    plan.test = remainder;

    Ok(plan)
}

/// Writes the split id lists as JSON files into `out_dir` and returns their
/// paths.
///
/// Besides the per-client lists and the global test list this includes
/// `combined_ids.json`, the full deduplicated pool in input order, so
/// downstream tooling can audit the splits against the pool they were drawn
/// from.
///
/// # Errors
/// Fails if the directory cannot be created or a file cannot be written.
pub fn write_split_files(
    plan: &SplitPlan,
    pool: &[PoolItem],
    out_dir: &Path,
) -> Result<Vec<PathBuf>, SplitError> {
    fs::create_dir_all(out_dir)?;
    let mut paths = Vec::new();
    let combined: Vec<String> = pool.iter().map(|item| item.id.clone()).collect();
    let path = out_dir.join("combined_ids.json");
    fs::write(&path, render_ids(&combined)?)?;
    paths.push(path);
    for (client_id, ids) in &plan.train {
        let path = out_dir.join(format!("client_{}_train.json", client_id));
        fs::write(&path, render_ids(ids)?)?;
        paths.push(path);
    }
    for (client_id, ids) in &plan.val {
        let path = out_dir.join(format!("client_{}_val.json", client_id));
        fs::write(&path, render_ids(ids)?)?;
        paths.push(path);
    }
    let path = out_dir.join("global_test.json");
    fs::write(&path, render_ids(&plan.test)?)?;
    paths.push(path);
    Ok(paths)
}

fn render_ids(ids: &[String]) -> Result<String, SplitError> {
    let mut contents = serde_json::to_string_pretty(ids)?;
    contents.push('\n');
    Ok(contents)
}

/// Groups the pool's ids by source, in order of first appearance.
fn partition_by_source(pool: &[PoolItem]) -> Vec<Vec<String>> {
    let mut sources = Vec::new();
    let mut pools: Vec<Vec<String>> = Vec::new();
    for item in pool {
        match sources.iter().position(|&source| source == item.source) {
            Some(index) => pools[index].push(item.id.clone()),
            None => {
                sources.push(item.source);
                pools.push(vec![item.id.clone()]);
            }
        }
    }
    pools
}

/// Draws the per-source proportions of one client's mixture.
fn draw_proportions(
    num_sources: usize,
    config: &SplitConfig,
    rng: &mut ChaCha20Rng,
) -> Result<Vec<f64>, SplitError> {
    if num_sources < 2 {
        return Ok(vec![1.]);
    }
    Ok(Dirichlet::new_with_size(config.concentration, num_sources)
        .map_err(|_| SplitError::InvalidConcentration(config.concentration))?
        .sample(rng))
}

/// Takes `n` ids from the source pools, mixed by the given proportions.
fn allocate(source_pools: &mut [Vec<String>], n: usize, proportions: &[f64]) -> Vec<String> {
    let mut ids = Vec::with_capacity(n);
    for (source_pool, count) in source_pools
        .iter_mut()
        .zip(proportional_counts(n, proportions))
    {
        let take = count.min(source_pool.len());
        ids.extend(source_pool.split_off(source_pool.len() - take));
    }
    // backfill when a source ran dry; the preflight size check guarantees
    // the combined pools can cover the shortfall
    while ids.len() < n {
        match source_pools.iter_mut().find_map(|source_pool| source_pool.pop()) {
            Some(id) => ids.push(id),
            None => break,
        }
    }
    debug_assert_eq!(ids.len(), n);
    ids
}

/// Splits `n` into per-source counts proportional to `proportions`, using
/// largest-remainder rounding.
fn proportional_counts(n: usize, proportions: &[f64]) -> Vec<usize> {
    let mut counts: Vec<usize> = proportions
        .iter()
        .map(|p| (p * n as f64).floor() as usize)
        .collect();
    let assigned: usize = counts.iter().sum();

    let fractional = |index: usize| proportions[index] * n as f64 - counts[index] as f64;
    let mut order: Vec<usize> = (0..proportions.len()).collect();
    order.sort_by(|&i, &j| {
        fractional(j)
            .partial_cmp(&fractional(i))
            .unwrap_or(Ordering::Equal)
    });
    for index in order.into_iter().take(n.saturating_sub(assigned)) {
        counts[index] += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn pool(human_eval: usize, mbpp: usize) -> Vec<PoolItem> {
        let he = (0..human_eval).map(|n| PoolItem {
            id: format!("he_{}", n),
            source: DataSource::HumanEval,
        });
        let mb = (0..mbpp).map(|n| PoolItem {
            id: format!("mbpp_{}", n),
            source: DataSource::Mbpp,
        });
        he.chain(mb).collect()
    }

    fn roster() -> Roster {
        Roster {
            clients: vec![
                RosterClient {
                    id: "alpha".into(),
                    train_samples: 4,
                    val_samples: 2,
                },
                RosterClient {
                    id: "beta".into(),
                    train_samples: 3,
                    val_samples: 1,
                },
            ],
        }
    }

    fn config() -> SplitConfig {
        SplitConfig {
            seed: 42,
            global_test_size: 5,
            concentration: 0.1,
        }
    }

    #[test]
    fn test_generate_splits_counts_and_disjointness() {
        let plan = generate_splits(&pool(12, 12), &roster(), &config()).unwrap();
        assert_eq!(plan.train[0].1.len(), 4);
        assert_eq!(plan.train[1].1.len(), 3);
        assert_eq!(plan.val[0].1.len(), 2);
        assert_eq!(plan.val[1].1.len(), 1);
        assert_eq!(plan.test.len(), 5);

        let mut seen = HashSet::new();
        let all = plan
            .train
            .iter()
            .chain(plan.val.iter())
            .flat_map(|(_, ids)| ids.iter())
            .chain(plan.test.iter());
        for id in all {
            assert!(seen.insert(id.clone()), "duplicate id {}", id);
        }
    }

    #[test]
    fn test_generate_splits_is_deterministic() {
        let first = generate_splits(&pool(20, 20), &roster(), &config()).unwrap();
        let second = generate_splits(&pool(20, 20), &roster(), &config()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_oversized_roster_fails_without_truncation() {
        // 10 roster samples + 5 test > 8 pool items
        let err = generate_splits(&pool(4, 4), &roster(), &config()).unwrap_err();
        match err {
            SplitError::InsufficientData {
                pool,
                required,
                train,
                val,
                test,
            } => {
                assert_eq!(pool, 8);
                assert_eq!(required, 15);
                assert_eq!(train, 7);
                assert_eq!(val, 3);
                assert_eq!(test, 5);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_concentration_is_rejected() {
        let mut config = config();
        config.concentration = 0.;
        let err = generate_splits(&pool(20, 20), &roster(), &config).unwrap_err();
        assert!(matches!(err, SplitError::InvalidConcentration(_)));
    }

    #[test]
    fn test_empty_roster_is_rejected() {
        let roster = Roster { clients: vec![] };
        let err = generate_splits(&pool(20, 20), &roster, &config()).unwrap_err();
        assert!(matches!(err, SplitError::EmptyRoster));
    }

    #[test]
    fn test_client_train_and_val_follow_one_mixture() {
        // both halves of a client are taken from the same drawn source
        // proportions, so their dominant source always agrees (odd counts
        // rule out ties)
        let roster = Roster {
            clients: vec![
                RosterClient {
                    id: "alpha".into(),
                    train_samples: 9,
                    val_samples: 9,
                },
                RosterClient {
                    id: "beta".into(),
                    train_samples: 9,
                    val_samples: 9,
                },
            ],
        };
        let plan = generate_splits(&pool(100, 100), &roster, &config()).unwrap();
        for ((client, train), (_, val)) in plan.train.iter().zip(plan.val.iter()) {
            assert_eq!(
                dominant_source(train),
                dominant_source(val),
                "client {}",
                client,
            );
        }
    }

    fn dominant_source(ids: &[String]) -> DataSource {
        let human_eval = ids.iter().filter(|id| id.starts_with("he_")).count();
        if human_eval * 2 > ids.len() {
            DataSource::HumanEval
        } else {
            DataSource::Mbpp
        }
    }

    #[test]
    fn test_single_source_pool_allocates() {
        let plan = generate_splits(&pool(20, 0), &roster(), &config()).unwrap();
        assert_eq!(plan.train[0].1.len(), 4);
        assert_eq!(plan.test.len(), 5);
    }

    #[test]
    fn test_read_pool_id_fallbacks() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"task_id": "HumanEval/0"}}"#).unwrap();
        writeln!(file, r#"{{"id": 7}}"#).unwrap();
        writeln!(file, "not json").unwrap();
        writeln!(file, r#"{{"prompt": "no id at all"}}"#).unwrap();
        file.flush().unwrap();

        let items = read_pool(file.path(), DataSource::HumanEval).unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].id, "HumanEval/0");
        assert_eq!(items[1].id, "he_7");
        assert_eq!(items[2].id, "he_3");
    }

    #[test]
    fn test_merge_pools_deduplicates() {
        let a = vec![
            PoolItem {
                id: "x".into(),
                source: DataSource::HumanEval,
            },
            PoolItem {
                id: "y".into(),
                source: DataSource::HumanEval,
            },
        ];
        let b = vec![
            PoolItem {
                id: "x".into(),
                source: DataSource::Mbpp,
            },
            PoolItem {
                id: "z".into(),
                source: DataSource::Mbpp,
            },
        ];
        let merged = merge_pools(vec![a, b]);
        let ids: Vec<&str> = merged.iter().map(|item| item.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "y", "z"]);
    }

    #[test]
    fn test_proportional_counts_sum_to_n() {
        for proportions in &[vec![0.5, 0.5], vec![0.9, 0.1], vec![0.33, 0.33, 0.34]] {
            let counts = proportional_counts(10, proportions);
            assert_eq!(counts.iter().sum::<usize>(), 10);
        }
    }

    #[test]
    fn test_write_split_files() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool(12, 12);
        let plan = generate_splits(&pool, &roster(), &config()).unwrap();
        let paths = write_split_files(&plan, &pool, dir.path()).unwrap();
        // the combined pool, two clients with train + val each, and the
        // global test file
        assert_eq!(paths.len(), 6);
        assert!(dir.path().join("client_alpha_train.json").is_file());
        assert!(dir.path().join("global_test.json").is_file());

        let contents = fs::read_to_string(dir.path().join("client_beta_val.json")).unwrap();
        let ids: Vec<String> = serde_json::from_str(&contents).unwrap();
        assert_eq!(ids, plan.val[1].1);

        let contents = fs::read_to_string(dir.path().join("combined_ids.json")).unwrap();
        let ids: Vec<String> = serde_json::from_str(&contents).unwrap();
        assert_eq!(ids.len(), pool.len());
        assert_eq!(ids[0], "he_0");
    }
}
