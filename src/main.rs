use clap::{Parser, Subcommand};
use qgdipole::{
    ProblemConfig, Solution, apply_passive_layers, include_passive_layers, solve_inhom_evp,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

#[derive(Parser)]
#[command(
    name = "qgdipole",
    version,
    about = "Solve the inhomogeneous eigenvalue problem for layered QG and SQG vortex dipoles",
    long_about = "Assembles the Hankel-mode operators of a layered quasi-geostrophic or surface \
                 quasi-geostrophic dipole problem from a TOML description and solves for the \
                 eigenvalues K and the coefficient matrix a."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble the operators and solve for K and a
    #[command(about = "Solve a problem description (outputs: solution TOML)")]
    Solve {
        /// Path to the problem description (.toml)
        config: PathBuf,

        /// Write the solution here instead of standard output
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Assemble the operators only and report their shapes
    Assemble {
        /// Path to the problem description (.toml)
        config: PathBuf,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Solve { config, output } => solve_command(&config, output.as_deref()),
        Commands::Assemble { config } => assemble_command(&config),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn solve_command(
    config_path: &Path,
    output_path: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    log::info!("Loading problem from: {}", config_path.display());
    let config = ProblemConfig::load(config_path)?;
    let full = config.build_system()?;
    let options = config.solver_options();

    let solution = match &config.active_layers {
        Some(active) => {
            let reduced = apply_passive_layers(&full, active)?;
            let compact = solve_inhom_evp(&reduced, &options)?;
            include_passive_layers(&compact.k, &compact.a, active)?
        }
        None => solve_inhom_evp(&full, &options)?,
    };
    log::info!("K = {}", solution.k);

    let text = render_solution(&solution)?;
    match output_path {
        Some(path) => {
            fs::write(path, text)?;
            log::info!("Solution saved to: {}", path.display());
        }
        None => print!("{text}"),
    }
    Ok(())
}

fn assemble_command(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = ProblemConfig::load(config_path)?;
    let system = config.build_system()?;
    println!("layers = {}", system.num_layers());
    println!("truncation = {}", system.truncation());
    println!("A = {:?}", system.a.shape());
    println!("B = {:?}", system.b.shape());
    println!("c = {:?}", system.c.shape());
    println!("d = {:?}", system.d.shape());
    Ok(())
}

fn render_solution(solution: &Solution) -> Result<String, toml::ser::Error> {
    toml::to_string_pretty(solution)
}
