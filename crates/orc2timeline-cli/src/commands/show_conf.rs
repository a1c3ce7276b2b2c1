//! `show_conf_file` and `show_conf` commands.

use orc2timeline_core::Config;
use serde_yaml::{Mapping, Value};

use crate::error::CliError;

pub fn show_conf_file(config: &Config) -> Result<(), CliError> {
    println!("Configuration file is located at the following path:");
    println!("{}", config.config_path().display());
    Ok(())
}

/// Print the parsed plugin table back as YAML, one entry per expanded
/// (archive, sub-archive) spec, so what is shown is exactly what the
/// scheduler will use.
pub fn show_conf(config: &Config) -> Result<(), CliError> {
    println!("Parsed configuration ({}):", config.config_path().display());
    println!("=======================================================================");

    let mut plugins = Vec::new();
    for spec in config.specs() {
        let mut fields = Mapping::new();
        fields.insert(
            Value::from("archive"),
            Value::from(spec.archive.clone()),
        );
        if let Some(sub) = &spec.sub_archive {
            fields.insert(Value::from("sub_archive"), Value::from(sub.clone()));
        }
        fields.insert(
            Value::from("match_pattern"),
            Value::from(spec.match_pattern.as_str()),
        );
        fields.insert(
            Value::from("source_type"),
            Value::from(spec.source_type.clone()),
        );

        let mut entry = Mapping::new();
        entry.insert(Value::from(spec.name.clone()), Value::Mapping(fields));
        plugins.push(Value::Mapping(entry));
    }

    let mut options = Mapping::new();
    options.insert(
        Value::from("chunk_size"),
        Value::from(config.chunk_size() as u64),
    );

    let mut document = Mapping::new();
    document.insert(Value::from("Plugins"), Value::Sequence(plugins));
    document.insert(Value::from("Options"), Value::Mapping(options));

    let rendered = serde_yaml::to_string(&Value::Mapping(document))
        .map_err(|e| CliError::Usage(format!("cannot render configuration: {e}")))?;
    print!("{rendered}");
    println!("=======================================================================");
    Ok(())
}
