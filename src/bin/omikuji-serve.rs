use clap::{Args, Parser, Subcommand};
use const_default::ConstDefault;
use log::error;
use omikuji_serve::model::eval;
use omikuji_serve::{DataSet, LabelTree, ModelHandle, SearchParams};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Predict with a trained label tree on a test dataset and report precision
    Test(TestArgs),
}

#[derive(Args)]
#[command(rename_all = "snake_case")]
struct TestArgs {
    /// Path of the directory where the trained model is saved
    #[arg(required = true)]
    model_path: PathBuf,

    /// Path to test dataset file
    ///
    /// The dataset file is expected to be in the format of the Extreme Classification
    /// Repository.
    #[arg(required = true)]
    test_data_path: PathBuf,

    /// Number of worker threads
    ///
    /// If 0, the number is selected automatically.
    #[arg(long, default_value_t = 0)]
    n_threads: usize,

    /// Density threshold above which sparse weight vectors are converted to dense format
    ///
    /// Lower values speed up prediction at the cost of more memory usage.
    #[arg(long, value_name = "DENSITY", default_value_t = 0.1)]
    max_sparse_density: f32,

    /// Beam size for beam search
    #[arg(long, default_value_t = SearchParams::DEFAULT.beam_size)]
    beam_size: usize,

    /// Number of top predictions to keep for each test example
    #[arg(long, value_name = "K", default_value_t = SearchParams::DEFAULT.top_k)]
    k_top: usize,

    /// Path to the which predictions will be written, if provided
    #[arg(long)]
    out_path: Option<PathBuf>,
}

fn resolve_n_threads(n_threads: usize) -> usize {
    if n_threads > 0 {
        n_threads
    } else {
        std::thread::available_parallelism().map_or(1, |n| n.get())
    }
}

fn test(args: &TestArgs) -> omikuji_serve::Result<()> {
    let tree = {
        let mut tree = LabelTree::load(&args.model_path)?;
        tree.densify_weights(args.max_sparse_density);
        tree
    };
    let handle = ModelHandle::new();
    handle.open_tree(tree, resolve_n_threads(args.n_threads))?;

    let test_dataset = DataSet::load_xc_repo_data_file(&args.test_data_path)?;
    let params = SearchParams::new(args.beam_size, args.k_top);
    let (predictions, _) = eval::test_all(&handle, &test_dataset, &params)?;
    handle.close();

    if let Some(out_path) = args.out_path.as_ref() {
        let mut writer = BufWriter::new(File::create(out_path)?);
        for prediction in predictions {
            for (i, &(label, score)) in prediction.iter().enumerate() {
                if i > 0 {
                    write!(&mut writer, "\t")?;
                }
                write!(&mut writer, "{} {:.3}", label, score)?;
            }
            writeln!(&mut writer)?;
        }
        writer.flush()?;
    }
    Ok(())
}

fn main() {
    simple_logger::init().unwrap();
    let cli = Cli::parse();
    let result = match &cli.command {
        Commands::Test(args) => test(args),
    };
    if let Err(e) = result {
        error!("{}", e);
        process::exit(1);
    }
}

#[test]
fn verify_cli() {
    use clap::CommandFactory;
    Cli::command().debug_assert();
}
