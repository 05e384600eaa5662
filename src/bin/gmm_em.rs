use gmm_stream::config::{EmConfig, ScoreForm};
use gmm_stream::data_format::Dataset;
use gmm_stream::em::EmDriver;
use gmm_stream::types::{Matrix, MixtureParams, Vector};
use gmm_stream::utils::{matrix_to_vecs, vecs_to_matrix, SyntheticMixture};
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
enum ScoreFormArg {
    Legacy,
    Textbook,
}

impl ScoreFormArg {
    fn to_form(self) -> ScoreForm {
        match self {
            Self::Legacy => ScoreForm::Legacy,
            Self::Textbook => ScoreForm::Textbook,
        }
    }
}

impl FromStr for ScoreFormArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "legacy" => Ok(Self::Legacy),
            "textbook" => Ok(Self::Textbook),
            _ => Err(format!("unsupported score form: {s}")),
        }
    }
}

#[derive(Debug)]
struct Args {
    data_json: Option<PathBuf>,
    rows: usize,
    dim: usize,
    clusters: usize,
    seed: u64,
    partitions: usize,
    max_iterations: usize,
    tolerance: f64,
    reg_covar: f64,
    score_form: ScoreFormArg,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            data_json: None,
            rows: 10_000,
            dim: 4,
            clusters: 3,
            seed: 42,
            partitions: 8,
            max_iterations: 100,
            tolerance: 1e-6,
            reg_covar: 1e-6,
            score_form: ScoreFormArg::Legacy,
        }
    }
}

/// A problem read from JSON. Rows may be `null` to mark missing data.
#[derive(Debug, Deserialize)]
struct JsonProblem {
    rows: Vec<Option<Vec<f64>>>,
    weights: Option<Vec<f64>>,
    means: Option<Vec<Vec<f64>>>,
    covariance: Option<Vec<Vec<f64>>>,
}

#[derive(Debug)]
struct Problem {
    data: Dataset,
    initial: MixtureParams,
    source: String,
}

#[derive(Debug, Serialize)]
struct EmReport {
    dataset: String,
    score_form: ScoreFormArg,
    rows: usize,
    missing_rows: usize,
    dimension: usize,
    clusters: usize,
    partitions: usize,
    iterations: usize,
    converged: bool,
    fit_seconds: f64,
    final_log_likelihood: Option<f64>,
    log_likelihoods: Vec<f64>,
    weights: Vec<f64>,
    means: Vec<Vec<f64>>,
    covariance: Vec<Vec<f64>>,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args()?;

    let problem = if let Some(path) = &args.data_json {
        load_json_problem(path, args.clusters)?
    } else {
        generate_synthetic_problem(args.rows, args.dim, args.clusters, args.seed)?
    };

    let config = EmConfig::new()
        .with_partitions(args.partitions)
        .with_max_iterations(args.max_iterations)
        .with_tolerance(args.tolerance)
        .with_reg_covar(args.reg_covar)
        .with_score_form(args.score_form.to_form());
    let driver = EmDriver::new(config)?;

    let fit_start = Instant::now();
    let fit = driver.fit(&problem.data, problem.initial)?;
    let fit_seconds = fit_start.elapsed().as_secs_f64();

    let report = EmReport {
        dataset: problem.source,
        score_form: args.score_form,
        rows: problem.data.size(),
        missing_rows: problem.data.num_missing(),
        dimension: fit.params.dimensionality(),
        clusters: fit.params.num_clusters(),
        partitions: args.partitions,
        iterations: fit.history.iterations(),
        converged: fit.history.converged,
        fit_seconds,
        final_log_likelihood: fit.history.log_likelihoods.last().copied(),
        log_likelihoods: fit.history.log_likelihoods.clone(),
        weights: fit.params.weights.iter().copied().collect(),
        means: matrix_to_vecs(&fit.params.means),
        covariance: matrix_to_vecs(&fit.params.covariance),
    };

    println!("=== EM report ===");
    println!("dataset: {}", report.dataset);
    println!("score_form: {:?}", report.score_form);
    println!(
        "rows/missing/dim/clusters: {}/{}/{}/{}",
        report.rows, report.missing_rows, report.dimension, report.clusters
    );
    println!("partitions: {}", report.partitions);
    println!("iterations: {}", report.iterations);
    println!("converged: {}", report.converged);
    println!("fit_seconds: {:.6}", report.fit_seconds);
    if let Some(ll) = report.final_log_likelihood {
        println!("log_likelihood: {:.6}", ll);
    } else {
        println!("log_likelihood: unavailable");
    }
    for (i, (w, mean)) in report.weights.iter().zip(&report.means).enumerate() {
        println!("cluster {i}: weight {w:.4} mean {mean:.4?}");
    }
    println!("json: {}", serde_json::to_string(&report)?);

    Ok(())
}

fn parse_args() -> Result<Args, Box<dyn Error>> {
    let mut args = Args::default();
    let mut it = std::env::args().skip(1);

    while let Some(flag) = it.next() {
        if flag == "--help" || flag == "-h" {
            print_help();
            std::process::exit(0);
        }
        let value = it.next();
        match flag.as_str() {
            "--data-json" => {
                let v = required_value(&flag, value)?;
                args.data_json = Some(PathBuf::from(v));
            }
            "--rows" => {
                let v = required_value(&flag, value)?;
                args.rows = v.parse()?;
            }
            "--dim" => {
                let v = required_value(&flag, value)?;
                args.dim = v.parse()?;
            }
            "--clusters" => {
                let v = required_value(&flag, value)?;
                args.clusters = v.parse()?;
            }
            "--seed" => {
                let v = required_value(&flag, value)?;
                args.seed = v.parse()?;
            }
            "--partitions" => {
                let v = required_value(&flag, value)?;
                args.partitions = v.parse()?;
            }
            "--max-iterations" => {
                let v = required_value(&flag, value)?;
                args.max_iterations = v.parse()?;
            }
            "--tolerance" => {
                let v = required_value(&flag, value)?;
                args.tolerance = v.parse()?;
            }
            "--reg-covar" => {
                let v = required_value(&flag, value)?;
                args.reg_covar = v.parse()?;
            }
            "--score-form" => {
                let v = required_value(&flag, value)?;
                args.score_form = ScoreFormArg::from_str(&v)?;
            }
            _ => {
                return Err(format!("unknown argument: {flag}").into());
            }
        }
    }

    Ok(args)
}

fn required_value(flag: &str, value: Option<String>) -> Result<String, Box<dyn Error>> {
    value.ok_or_else(|| format!("missing value for {flag}").into())
}

fn print_help() {
    println!(
        "gmm_em\n\
        Partitioned EM for a Gaussian mixture with shared covariance.\n\n\
        Usage:\n\
          cargo run --release --bin gmm_em -- [options]\n\n\
        Options:\n\
          --data-json <path>          JSON object with rows and optional weights/means/covariance\n\
          --rows <int>                rows for synthetic mode (default: 10000)\n\
          --dim <int>                 dimensionality for synthetic mode (default: 4)\n\
          --clusters <int>            mixture components (default: 3)\n\
          --seed <int>                RNG seed (default: 42)\n\
          --partitions <int>          data partitions (default: 8)\n\
          --max-iterations <int>      iteration cap (default: 100)\n\
          --tolerance <float>         log-likelihood change to stop at (default: 1e-6)\n\
          --reg-covar <float>         ridge added to the covariance (default: 1e-6)\n\
          --score-form <name>         legacy|textbook (default: legacy)\n\
          --help                      print this help\n\n\
        Set RUST_LOG=info to trace iterations.\n"
    );
}

fn load_json_problem(path: &PathBuf, clusters: usize) -> Result<Problem, Box<dyn Error>> {
    let raw = fs::read_to_string(path)?;
    let json: JsonProblem = serde_json::from_str(&raw)?;

    let data = Dataset::from_optional(json.rows)?;
    if data.size() == data.num_missing() {
        return Err("problem JSON must include at least one complete row".into());
    }
    let d = data.dimensionality();

    let means = match json.means {
        Some(means) => vecs_to_matrix(&means)?,
        None => spread_means(&data, clusters)?,
    };
    let k = means.nrows();
    let weights = match json.weights {
        Some(w) => Vector::from_vec(w),
        None => Vector::from_element(k, 1.0 / k as f64),
    };
    let covariance = match json.covariance {
        Some(cov) => vecs_to_matrix(&cov)?,
        None => Matrix::identity(d, d),
    };

    Ok(Problem {
        data,
        initial: MixtureParams::new(weights, means, covariance)?,
        source: path.display().to_string(),
    })
}

/// Complete rows picked at evenly spaced positions, used when the input
/// carries no starting means.
fn spread_means(data: &Dataset, clusters: usize) -> Result<Matrix, Box<dyn Error>> {
    let complete: Vec<&[f64]> = data.rows().iter().filter_map(|r| r.as_deref()).collect();
    if clusters == 0 || clusters > complete.len() {
        return Err(format!(
            "cannot pick {clusters} starting means from {} complete rows",
            complete.len()
        )
        .into());
    }
    let step = complete.len() / clusters;
    let picked: Vec<Vec<f64>> = (0..clusters).map(|i| complete[i * step].to_vec()).collect();
    Ok(vecs_to_matrix(&picked)?)
}

fn generate_synthetic_problem(
    rows: usize,
    dim: usize,
    clusters: usize,
    seed: u64,
) -> Result<Problem, Box<dyn Error>> {
    let mixture = SyntheticMixture::spaced(clusters, dim, 6.0, 1.0)?;
    let data = mixture.sample_dataset(rows, seed)?;

    // Start near the true centers, not on them.
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(1));
    let jitter = Normal::new(0.0, 1.0)?;
    let mut means = mixture.centers().clone();
    means.iter_mut().for_each(|m| *m += jitter.sample(&mut rng));

    let initial = MixtureParams::new(
        Vector::from_element(clusters, 1.0 / clusters as f64),
        means,
        Matrix::identity(dim, dim),
    )?;

    Ok(Problem {
        data,
        initial,
        source: format!("synthetic_n{}_d{}_k{}", rows, dim, clusters),
    })
}
