use std::{process::ExitCode, sync::Arc};

use clap::Parser;
use jexec::runtime::{
    Exception, JavaThread, Klass, Method, Runtime, Value, VmEnv, VmOptions, VmResult,
    initialize_class, require_class,
};

#[derive(Parser, Debug)]
#[command(version, about = "Load and link a class, then print its layout", long_about = None)]
struct Cli {
    /// Class search path of directories, jar and jmod files, separated by ':'
    #[arg(short = 'c', long = "class-path", visible_alias = "cp")]
    class_path: Option<String>,

    /// Run the static initializer as well
    #[arg(long)]
    init: bool,

    /// Log class definitions and initialization
    #[arg(short, long)]
    verbose: bool,

    /// Internal name of the class, e.g. java/lang/String
    class_name: String,
}

/// There is no bytecode interpreter behind this tool, so any Java code the
/// class needs to run fails.
struct NoInterpreter;

impl JavaThread for NoInterpreter {
    fn run_method(
        &self,
        _runtime: &Runtime,
        method: &Arc<Method>,
        _args: Vec<Value>,
    ) -> VmResult<Option<Value>> {
        Err(Exception::Internal(format!(
            "no bytecode interpreter attached to run {}.{}{}",
            method.owner_name(),
            method.name(),
            method.descriptor()
        )))
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> VmResult<()> {
    let class_path = cli
        .class_path
        .as_deref()
        .map(|entries| entries.split(':').filter(|entry| !entry.is_empty()).collect())
        .unwrap_or_else(Vec::new);
    let options = VmOptions::default()
        .with_class_path(class_path)
        .verbose_class_loading(cli.verbose);
    let runtime = Runtime::new(options)?;
    runtime.bootstrap()?;

    let klass = require_class(None, &runtime, &cli.class_name)?;
    if cli.init {
        initialize_class(VmEnv::new(&runtime, &NoInterpreter), &klass)?;
    }
    print_class(&klass);
    runtime.shutdown();
    Ok(())
}

fn print_class(klass: &Klass) {
    println!("class {} ({:?})", klass.name(), klass.class_type());
    println!("  state: {:?}", klass.state());
    println!("  flags: {:?}", klass.access_flags());
    if let Some(super_class) = klass.super_class() {
        println!("  super: {}", super_class.name());
    }
    for interface in klass.interfaces() {
        println!("  implements: {}", interface.name());
    }
    let Some(instance) = klass.as_instance() else {
        return;
    };

    println!("  instance fields:");
    for (offset, field_id) in instance.instance_fields().iter().enumerate() {
        if let Some(field) = field_id.field() {
            println!("    [{offset}] {}", field.identity());
        }
    }
    let mut statics: Vec<_> = instance
        .static_fields()
        .filter_map(|field_id| Some((field_id.offset(), field_id.field()?.identity())))
        .collect();
    statics.sort();
    println!("  static fields:");
    for (offset, identity) in statics {
        println!("    [{offset}] {identity}");
    }

    let mut vtable: Vec<_> = instance
        .vtable()
        .map(|(key, method)| (key.clone(), Arc::clone(method.owner_name())))
        .collect();
    vtable.sort();
    println!("  vtable:");
    for (key, owner) in vtable {
        println!("    {key} -> {owner}");
    }
}
