use clap::{Parser, Subcommand};
use kspv_core::{readback, writer, Options, OutputFormat, SamplerMap};
use log::{info, LevelFilter};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Parser)]
#[command(name = "kspv")]
#[command(about = "Lowers kernel IR to SPIR-V compute shaders", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a kernel IR file to SPIR-V
    Compile {
        /// Input kernel IR file
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Output file (defaults to the input name with .spv, .spvasm or .inc)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Write SPIR-V assembly text
        #[arg(long, conflicts_with = "c_init")]
        asm: bool,

        /// Write the binary as a C initializer list
        #[arg(long)]
        c_init: bool,

        /// Write the descriptor map to a file
        #[arg(long, value_name = "FILE")]
        descriptormap: Option<PathBuf>,

        #[command(flatten)]
        lowering: LoweringArgs,

        /// Print verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Lower a kernel IR file and check the result without writing output
    Check {
        /// Input kernel IR file
        #[arg(value_name = "FILE")]
        input: PathBuf,

        #[command(flatten)]
        lowering: LoweringArgs,

        /// Print verbose output
        #[arg(short, long)]
        verbose: bool,
    },
}

#[derive(clap::Args)]
struct LoweringArgs {
    /// Sampler map file of `literal,expression` lines
    #[arg(long, value_name = "FILE")]
    samplermap: Option<PathBuf>,

    /// Keep module-scope constants in a storage buffer
    #[arg(long)]
    module_constants_in_storage_buffer: bool,

    /// Pass plain-old-data arguments in uniform buffers
    #[arg(long)]
    pod_ubo: bool,

    /// Give every kernel its own descriptor set
    #[arg(long)]
    distinct_kernel_descriptor_sets: bool,

    /// Emit numeric undef values as null constants
    #[arg(long)]
    hack_undef: bool,

    /// Store the workgroup size into its builtin at kernel entry
    #[arg(long)]
    hack_initializers: bool,

    /// Log the id given to each function
    #[arg(long)]
    show_ids: bool,
}

impl LoweringArgs {
    fn options(&self, output: OutputFormat) -> Result<Options, DriverError> {
        let sampler_map = match &self.samplermap {
            Some(path) => SamplerMap::from_file(path)?,
            None => SamplerMap::default(),
        };
        Ok(Options {
            module_constants_in_storage_buffer: self.module_constants_in_storage_buffer,
            pod_args_in_uniform_buffer: self.pod_ubo,
            distinct_kernel_descriptor_sets: self.distinct_kernel_descriptor_sets,
            hack_undef: self.hack_undef,
            hack_initializers: self.hack_initializers,
            show_ids: self.show_ids,
            output,
            sampler_map,
        })
    }
}

#[derive(Debug, Error)]
enum DriverError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Compilation error: {0}")]
    CompilationError(#[from] kspv_core::ProducerError),
}

fn main() -> Result<(), DriverError> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Commands::Compile { verbose, .. } | Commands::Check { verbose, .. } => *verbose,
    };
    let mut logger = env_logger::Builder::from_default_env();
    if verbose {
        logger.filter_level(LevelFilter::Info);
    }
    logger.init();

    match cli.command {
        Commands::Compile {
            input,
            output,
            asm,
            c_init,
            descriptormap,
            lowering,
            verbose,
        } => {
            let format = if asm {
                OutputFormat::Assembly
            } else if c_init {
                OutputFormat::CInitList
            } else {
                OutputFormat::Binary
            };
            let options = lowering.options(format)?;
            compile_file(&input, output, descriptormap, &options, verbose)?;
        }
        Commands::Check {
            input,
            lowering,
            verbose,
        } => {
            let options = lowering.options(OutputFormat::Binary)?;
            check_file(&input, &options, verbose)?;
        }
    }

    Ok(())
}

fn default_output_path(input: &Path, format: OutputFormat) -> PathBuf {
    let extension = match format {
        OutputFormat::Binary => "spv",
        OutputFormat::Assembly => "spvasm",
        OutputFormat::CInitList => "inc",
    };
    input.with_extension(extension)
}

fn compile_file(
    input: &Path,
    output: Option<PathBuf>,
    descriptormap: Option<PathBuf>,
    options: &Options,
    verbose: bool,
) -> Result<(), DriverError> {
    if verbose {
        info!("Compiling {}...", input.display());
    }

    let source = fs::read_to_string(input)?;
    let produced = kspv_core::compile(&source, options)?;

    let output_path = output.unwrap_or_else(|| default_output_path(input, options.output));
    fs::write(&output_path, writer::write(&produced.module, options.output))?;

    if let Some(path) = descriptormap {
        fs::write(&path, produced.descriptor_map.render())?;
        if verbose {
            info!("Wrote descriptor map to {}", path.display());
        }
    }

    if verbose {
        info!(
            "Wrote {} ({} instructions, bound {})",
            output_path.display(),
            produced.module.instructions.len(),
            produced.module.bound
        );
    }
    Ok(())
}

fn check_file(input: &Path, options: &Options, verbose: bool) -> Result<(), DriverError> {
    if verbose {
        info!("Checking {}...", input.display());
    }

    let source = fs::read_to_string(input)?;
    let produced = kspv_core::compile(&source, options)?;

    let binary = writer::write_binary(&produced.module);
    let summary = readback::summarize(&readback::load_bytes(&binary)?);
    println!(
        "✓ {}: {} entry point(s) [{}], {} function(s), bound {}",
        input.display(),
        summary.entry_points.len(),
        summary.entry_points.join(", "),
        summary.functions,
        summary.bound
    );
    Ok(())
}
