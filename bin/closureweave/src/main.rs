use closureweave::jvm::class_graph::{CachingResolver, ClassPath};
use closureweave::jvm::{BinaryName, Name};
use closureweave::weave::{Error, Settings, WeaveCache, Weaver};

use clap::{value_parser, Arg, ArgAction, Command};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

fn main() {
    env_logger::init();

    let matches = Command::new("closureweave")
        .version(clap::crate_version!())
        .author("Alec Theriault <alec.theriault@gmail.com>")
        .about("Extract closure expressions in JVM class files into synthesized classes")
        .arg(
            Arg::new("classpath")
                .long("classpath")
                .value_name("DIR")
                .action(ArgAction::Append)
                .value_parser(value_parser!(PathBuf))
                .help("Directory of classes referenced by the inputs (repeatable)"),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .value_name("DIR")
                .default_value(".")
                .value_parser(value_parser!(PathBuf))
                .help("Directory under which woven and synthesized classes are written"),
        )
        .arg(
            Arg::new("factory-annotation")
                .long("factory-annotation")
                .value_name("CLASS_NAME")
                .help("Annotation marking lambda factories (eg. `closureweave/Lambda`)"),
        )
        .arg(
            Arg::new("param-annotation")
                .long("param-annotation")
                .value_name("CLASS_NAME")
                .help("Annotation marking lambda parameter fields (eg. `closureweave/Param`)"),
        )
        .arg(
            Arg::new("include")
                .long("include")
                .value_name("PATTERN")
                .action(ArgAction::Append)
                .help("Only weave classes whose binary name matches (repeatable)"),
        )
        .arg(
            Arg::new("exclude")
                .long("exclude")
                .value_name("PATTERN")
                .action(ArgAction::Append)
                .help("Never weave classes whose binary name matches (repeatable)"),
        )
        .arg(
            Arg::new("INPUT")
                .help("Class files to weave")
                .required(true)
                .num_args(1..)
                .value_parser(value_parser!(PathBuf)),
        )
        .get_matches();

    let mut settings = match settings(
        matches.get_one::<String>("factory-annotation"),
        matches.get_one::<String>("param-annotation"),
    ) {
        Ok(settings) => settings,
        Err(err) => {
            log::error!("{}", err);
            process::exit(2);
        }
    };
    for pattern in matches.get_many::<String>("include").into_iter().flatten() {
        settings.filter.include(pattern.as_str());
    }
    for pattern in matches.get_many::<String>("exclude").into_iter().flatten() {
        settings.filter.exclude(pattern.as_str());
    }

    let classpath = ClassPath::directories(
        matches
            .get_many::<PathBuf>("classpath")
            .into_iter()
            .flatten()
            .cloned(),
    );
    let resolver = CachingResolver::new(classpath);
    let cache = WeaveCache::new();
    let weaver = Weaver::new(settings, &resolver, &cache);
    let output = matches
        .get_one::<PathBuf>("output")
        .cloned()
        .unwrap_or_else(|| PathBuf::from("."));

    let mut failures = 0;
    for input in matches.get_many::<PathBuf>("INPUT").into_iter().flatten() {
        if let Err(err) = weave_file(&weaver, input, &output) {
            log::error!("Failed to weave '{}': {}", input.display(), err);
            failures += 1;
        }
    }

    if failures > 0 {
        log::warn!("{} class(es) could not be woven", failures);
        process::exit(1);
    }
}

/// Settings from the command line, with defaults for what is missing
fn settings(factory: Option<&String>, param: Option<&String>) -> Result<Settings, Error> {
    let defaults = Settings::default();
    let factory = factory.map_or(defaults.factory_annotation.as_str(), String::as_str);
    let param = param.map_or(defaults.parameter_annotation.as_str(), String::as_str);
    Settings::new(factory, param)
}

fn weave_file(weaver: &Weaver, input: &Path, output: &Path) -> Result<(), Error> {
    log::info!("Reading '{}'", input.display());
    let bytes = fs::read(input)?;
    let woven = weaver.weave_class(&bytes)?;
    if !woven.is_woven() {
        log::warn!("Nothing woven in {}, copying it unchanged", woven.class_name);
    }

    write_class(output, &woven.class_name, &woven.bytes)?;
    for (name, bytes) in &woven.synthesized {
        write_class(output, name, bytes)?;
    }
    Ok(())
}

fn write_class(output: &Path, name: &BinaryName, bytes: &[u8]) -> Result<(), Error> {
    let path = output.join(format!("{}.class", name.as_str()));
    log::info!("Writing '{}'", path.display());
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, bytes)?;
    Ok(())
}
