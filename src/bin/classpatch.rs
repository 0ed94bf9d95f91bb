use std::borrow::Cow;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use classpatch::catalogue;
use classpatch::registry::internal_name;
use classpatch::{Capabilities, LoaderHierarchy, RegistryBuilder};

/// Applies the built-in patch rules to one class file.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Fully qualified name of the class, dotted or internal.
    #[arg(short, long, required = true)]
    class: String,

    #[arg(short, long, required = true)]
    input: PathBuf,

    #[arg(short, long, required = true)]
    output: PathBuf,

    /// Directories holding the classes the patched class refers to.
    #[arg(long = "classpath")]
    classpath: Vec<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    let args = Args::parse();

    let classpath = args.classpath.clone();
    let hierarchy = LoaderHierarchy::new(move |name: &str| {
        classpath
            .iter()
            .map(|dir| dir.join(format!("{name}.class")))
            .find_map(|path| fs::read(path).ok())
    });

    let mut builder = RegistryBuilder::new();
    catalogue::register_all(&mut builder);
    let capabilities = Capabilities::from_hierarchy(builder.markers(), &hierarchy);
    builder.capabilities(capabilities);
    let registry = builder.build();

    let bytes = fs::read(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;
    let patched = registry
        .apply(&args.class, &bytes, &hierarchy)
        .with_context(|| format!("patching {}", internal_name(&args.class)))?;

    match &patched {
        Cow::Borrowed(_) => log::info!("No rule changed {}", args.class),
        Cow::Owned(out) => log::info!("Patched {} ({} -> {} bytes)", args.class, bytes.len(), out.len()),
    }
    fs::write(&args.output, patched.as_ref())
        .with_context(|| format!("writing {}", args.output.display()))?;
    Ok(())
}
