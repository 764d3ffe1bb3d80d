//! Generate one feed and print it.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use super::AppContext;
use crate::converter::Converter;
use crate::generator::{Parameters, QueryParameters};

/// Split a `key=value` argument at the first `=`.
///
/// # Errors
///
/// Returns a message when there is no `=` or the key is empty.
pub fn parse_key_value(argument: &str) -> std::result::Result<(String, String), String> {
    match argument.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{argument}'")),
    }
}

/// Command to run one generator and print the converted feed to stdout.
#[derive(Args, Debug)]
pub struct GenerateCommand {
    /// Name of the generator in the configuration file
    name: String,

    /// Output format (atom, rss or html)
    #[arg(short, long, default_value = "atom")]
    format: String,

    /// Path parameter passed to the generator, repeatable
    #[arg(short = 'p', long = "parameter", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    parameters: Vec<(String, String)>,

    /// Query parameter passed to the generator, repeatable; repeated keys keep every value
    #[arg(short = 'q', long = "query-parameter", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    query_parameters: Vec<(String, String)>,
}

impl GenerateCommand {
    fn query(&self) -> QueryParameters {
        let mut query = QueryParameters::new();
        for (key, value) in &self.query_parameters {
            query.entry(key.clone()).or_default().push(value.clone());
        }
        query
    }

    pub async fn execute(self, context: &AppContext) -> Result<()> {
        let converter: Converter = self.format.parse()?;
        let parameters: Parameters = self.parameters.iter().cloned().collect();
        let query = self.query();

        let generators = Arc::clone(&context.generators);
        let name = self.name.clone();
        let feed =
            tokio::task::spawn_blocking(move || generators.generate(&name, &parameters, &query))
                .await
                .context("Generation task failed")??;

        let rendered = converter.convert(&feed)?;
        println!("{}", rendered.body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(parse_key_value("a=b=c").unwrap(), ("a".to_string(), "b=c".to_string()));
        assert_eq!(parse_key_value("a=").unwrap(), ("a".to_string(), String::new()));
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn test_repeated_query_parameters() {
        let command = GenerateCommand {
            name: "n".to_string(),
            format: "rss".to_string(),
            parameters: vec![],
            query_parameters: vec![
                ("tag".to_string(), "a".to_string()),
                ("tag".to_string(), "b".to_string()),
            ],
        };
        assert_eq!(command.query()["tag"], vec!["a".to_string(), "b".to_string()]);
    }
}
