//! Feed generation strategies and the generator registry.
//!
//! A [`FeedGenerator`] turns a source into a [`Feed`]. Three strategies ship with
//! feedgen and are interchangeable behind the same trait:
//!
//! | Type | Strategy | Source |
//! |------|----------|--------|
//! | `template` | [`TemplateGenerator`] | every field is an expression over selection filters |
//! | `selector` | [`SelectorGenerator`] | fields are CSS selector / attribute rules |
//! | `browser` | [`BrowserGenerator`] | a browser session runs scripts that return the records |
//!
//! [`FeedGenerators`] maps configured generator names to strategy instances. It owns the
//! root [`Scope`] with the builtin callables and, for each request, creates a child scope
//! carrying the request parameters:
//!
//! | Name | Kind | Value |
//! |------|------|-------|
//! | `parameters` | variable | path parameters as an object |
//! | `query_parameters` | variable | query parameters, each a list of values |
//! | `param(name=)` | function | one path parameter, null when absent |
//! | `query_param(name=)` | function | first value of a query parameter, null when absent |
//! | `query_params()` | function | the URL-encoded query string |
//!
//! # Reloading
//!
//! [`FeedGenerators::load_config`] builds the complete generator table first and swaps
//! it in only when every entry loaded, so a bad configuration leaves the running table
//! untouched. In-flight generations keep the strategy instance they started with.

pub mod browser;
mod pipeline;
pub mod selector;
pub mod template;

pub use browser::{BrowserDriver, BrowserGenerator, BrowserSession, SessionSettings};
pub use pipeline::{Stage, absolute_link};
pub use selector::SelectorGenerator;
pub use template::TemplateGenerator;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::{Map, Value, json};

use crate::config::{Config, GeneratorOptions};
use crate::core::{FeedgenError, Result};
use crate::fetch::DocumentFetcher;
use crate::models::Feed;
use crate::repository::Repository;
use crate::templating::scope::string_arg;
use crate::templating::{Scope, evaluate, register_builtins};

/// Path parameters of one request.
pub type Parameters = BTreeMap<String, String>;

/// Query parameters of one request; a name may repeat.
pub type QueryParameters = BTreeMap<String, Vec<String>>;

/// What a strategy gets to work with for one generation call.
#[derive(Clone)]
pub struct GeneratorContext {
    /// Shared cache repository
    pub repository: Repository,
    /// Request scope (child of the registry's root scope)
    pub scope: Scope,
    /// Fetches source and linked documents
    pub fetcher: Arc<dyn DocumentFetcher>,
}

/// One extraction strategy.
pub trait FeedGenerator: Send + Sync {
    /// Decode and validate the strategy's options.
    ///
    /// # Errors
    ///
    /// Configuration errors ([`FeedgenError::ConfigError`],
    /// [`FeedgenError::InvalidFieldRule`], ...).
    fn load_options(&mut self, options: &GeneratorOptions) -> Result<()>;

    /// Produce the feed. No partial feed is returned on failure.
    fn generate(&self, context: &GeneratorContext) -> Result<Feed>;
}

/// Creates a fresh, unconfigured strategy instance.
pub type GeneratorFactory = Arc<dyn Fn() -> Box<dyn FeedGenerator> + Send + Sync>;

/// A loaded generator.
pub struct LoadedGenerator {
    pub name: String,
    /// Evaluated endpoint path
    pub endpoint: String,
    generator: Box<dyn FeedGenerator>,
}

impl fmt::Debug for LoadedGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedGenerator")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

/// Registry of strategy types and configured generators.
pub struct FeedGenerators {
    factories: HashMap<String, GeneratorFactory>,
    generators: RwLock<Arc<BTreeMap<String, Arc<LoadedGenerator>>>>,
    repository: Repository,
    fetcher: Arc<dyn DocumentFetcher>,
    root: Scope,
}

impl FeedGenerators {
    /// An empty registry; strategies still have to be [`register`](Self::register)ed.
    ///
    /// # Errors
    ///
    /// Fails only if the builtin callables cannot be registered on the root scope.
    pub fn new(repository: Repository, fetcher: Arc<dyn DocumentFetcher>) -> Result<Self> {
        let root = Scope::root();
        register_builtins(&root)?;
        Ok(Self {
            factories: HashMap::new(),
            generators: RwLock::new(Arc::new(BTreeMap::new())),
            repository,
            fetcher,
            root,
        })
    }

    /// A registry with the `template`, `selector` and `browser` strategies.
    pub fn with_default_strategies(
        repository: Repository,
        fetcher: Arc<dyn DocumentFetcher>,
        browser: Arc<dyn BrowserDriver>,
        no_sandbox: bool,
    ) -> Result<Self> {
        let mut generators = Self::new(repository, fetcher)?;
        generators.register("template", || Box::new(TemplateGenerator::default()));
        generators.register("selector", || Box::new(SelectorGenerator::default()));
        generators.register("browser", move || {
            Box::new(BrowserGenerator::new(Arc::clone(&browser), no_sandbox))
        });
        Ok(generators)
    }

    /// Register a strategy type, replacing an earlier registration of the same name.
    pub fn register<F>(&mut self, type_name: &str, factory: F)
    where
        F: Fn() -> Box<dyn FeedGenerator> + Send + Sync + 'static,
    {
        self.factories.insert(type_name.to_string(), Arc::new(factory));
    }

    /// The root scope shared by every request.
    #[must_use]
    pub fn root_scope(&self) -> &Scope {
        &self.root
    }

    #[must_use]
    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    fn table(&self) -> Arc<BTreeMap<String, Arc<LoadedGenerator>>> {
        Arc::clone(&self.generators.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Configured generator names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.table().keys().cloned().collect()
    }

    /// `(name, endpoint)` of every configured generator, sorted by name.
    #[must_use]
    pub fn endpoints(&self) -> Vec<(String, String)> {
        self.table()
            .values()
            .map(|loaded| (loaded.name.clone(), loaded.endpoint.clone()))
            .collect()
    }

    /// Replace the generator table with the generators of `config`.
    ///
    /// # Errors
    ///
    /// - [`FeedgenError::UnknownGeneratorType`] for an unregistered `type`
    /// - [`FeedgenError::InvalidEndpoint`] for an endpoint not starting with `/` or used
    ///   twice
    /// - any error of a strategy's [`FeedGenerator::load_options`]
    ///
    /// On error the previous table stays active.
    pub fn load_config(&self, config: &Config) -> Result<()> {
        let mut table = BTreeMap::new();
        let mut used_endpoints: HashMap<String, String> = HashMap::new();

        for (name, generator_config) in &config.generators {
            let factory = self.factories.get(&generator_config.generator_type).ok_or_else(|| {
                let mut known: Vec<String> = self.factories.keys().cloned().collect();
                known.sort();
                FeedgenError::UnknownGeneratorType {
                    generator: name.clone(),
                    type_name: generator_config.generator_type.clone(),
                    known,
                }
            })?;

            let mut generator = factory();
            generator.load_options(&generator_config.options).map_err(|e| match e {
                FeedgenError::ConfigError {
                    message,
                } => FeedgenError::ConfigError {
                    message: format!("generator '{name}': {message}"),
                },
                other => other,
            })?;

            let endpoint = match &generator_config.endpoint {
                Some(expression) => evaluate(expression, &self.root)?,
                None => format!("/{name}"),
            };
            if !endpoint.starts_with('/') {
                return Err(FeedgenError::InvalidEndpoint {
                    generator: name.clone(),
                    endpoint,
                    reason: "must start with '/'".to_string(),
                });
            }
            if let Some(owner) = used_endpoints.insert(endpoint.clone(), name.clone()) {
                return Err(FeedgenError::InvalidEndpoint {
                    generator: name.clone(),
                    endpoint,
                    reason: format!("already used by generator '{owner}'"),
                });
            }

            tracing::debug!(
                "Loaded generator '{}' ({}) at {}",
                name,
                generator_config.generator_type,
                endpoint
            );
            table.insert(
                name.clone(),
                Arc::new(LoadedGenerator {
                    name: name.clone(),
                    endpoint,
                    generator,
                }),
            );
        }

        tracing::info!("Loaded {} generator(s)", table.len());
        *self.generators.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(table);
        Ok(())
    }

    /// Run the generator called `name` with the request parameters.
    ///
    /// # Errors
    ///
    /// [`FeedgenError::GeneratorNotFound`] for an unknown name; strategy failures are
    /// wrapped in [`FeedgenError::GenerationFailed`].
    pub fn generate(
        &self,
        name: &str,
        parameters: &Parameters,
        query_parameters: &QueryParameters,
    ) -> Result<Feed> {
        let table = self.table();
        let Some(loaded) = table.get(name).cloned() else {
            return Err(FeedgenError::GeneratorNotFound {
                name: name.to_string(),
                available: table.keys().cloned().collect(),
            });
        };
        drop(table);

        let context = GeneratorContext {
            repository: self.repository.clone(),
            scope: self.request_scope(parameters, query_parameters)?,
            fetcher: Arc::clone(&self.fetcher),
        };

        tracing::info!("Generating feed '{}'", name);
        let wrap = |source: FeedgenError| FeedgenError::GenerationFailed {
            generator: name.to_string(),
            source: Box::new(source),
        };
        let feed = pipeline::guarded(|| loaded.generator.generate(&context)).map_err(wrap)?;
        tracing::info!("Generated feed '{}' with {} item(s)", name, feed.items.len());
        Ok(feed)
    }

    fn request_scope(
        &self,
        parameters: &Parameters,
        query_parameters: &QueryParameters,
    ) -> Result<Scope> {
        let scope = self.root.child();
        scope.set("parameters", json!(parameters));
        scope.set("query_parameters", json!(query_parameters));

        let params = parameters.clone();
        scope.add_function("param", move |args: &HashMap<String, Value>| {
            let name = string_arg(args, "name").unwrap_or_default();
            Ok(params.get(name).map_or(Value::Null, |v| Value::String(v.clone())))
        })?;

        let query = query_parameters.clone();
        scope.add_function("query_param", move |args: &HashMap<String, Value>| {
            let name = string_arg(args, "name").unwrap_or_default();
            Ok(query
                .get(name)
                .and_then(|values| values.first())
                .map_or(Value::Null, |v| Value::String(v.clone())))
        })?;

        let encoded = encode_query(query_parameters);
        scope.add_function("query_params", move |_: &HashMap<String, Value>| {
            Ok(Value::String(encoded.clone()))
        })?;

        Ok(scope)
    }
}

impl fmt::Debug for FeedGenerators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut strategies: Vec<&String> = self.factories.keys().collect();
        strategies.sort();
        f.debug_struct("FeedGenerators")
            .field("strategies", &strategies)
            .field("generators", &self.names())
            .field("repository", &self.repository)
            .finish_non_exhaustive()
    }
}

/// URL-encode query parameters, repeating names with several values.
#[must_use]
pub fn encode_query(query_parameters: &QueryParameters) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (name, values) in query_parameters {
        for value in values {
            serializer.append_pair(name, value);
        }
    }
    serializer.finish()
}

/// Parse a raw query string into [`QueryParameters`].
#[must_use]
pub fn parse_query(query: &str) -> QueryParameters {
    let mut parameters = QueryParameters::new();
    for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
        parameters.entry(name.into_owned()).or_default().push(value.into_owned());
    }
    parameters
}

/// Object form of a record for the `feed` variable.
pub(crate) fn to_variable<T: serde::Serialize>(name: &str, value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| FeedgenError::SerializationError {
        key: name.to_string(),
        reason: e.to_string(),
    })
}

/// Empty object, used before a record exists.
pub(crate) fn empty_object() -> Value {
    Value::Object(Map::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorCategory;
    use crate::models::Feed;
    use chrono::Utc;
    use url::Url;

    /// Renders configured expressions into the feed title.
    #[derive(Default)]
    struct EchoGenerator {
        title: String,
    }

    impl FeedGenerator for EchoGenerator {
        fn load_options(&mut self, options: &GeneratorOptions) -> Result<()> {
            #[derive(serde::Deserialize)]
            struct Options {
                title: String,
            }
            self.title = options.decode::<Options>("echo")?.title;
            Ok(())
        }

        fn generate(&self, context: &GeneratorContext) -> Result<Feed> {
            let mut feed = Feed::new("echo", Utc::now());
            feed.title = evaluate(&self.title, &context.scope)?;
            Ok(feed)
        }
    }

    struct PanickingGenerator;

    impl FeedGenerator for PanickingGenerator {
        fn load_options(&mut self, _: &GeneratorOptions) -> Result<()> {
            Ok(())
        }

        fn generate(&self, _: &GeneratorContext) -> Result<Feed> {
            panic!("boom")
        }
    }

    fn registry() -> FeedGenerators {
        let fetcher = |url: &Url| -> Result<String> { Ok(url.to_string()) };
        let mut generators = FeedGenerators::new(Repository::memory(), Arc::new(fetcher)).unwrap();
        generators.register("echo", || Box::new(EchoGenerator::default()));
        generators.register("panic", || Box::new(PanickingGenerator));
        generators
    }

    fn config(yaml: &str) -> Config {
        Config::from_yaml(yaml).unwrap()
    }

    #[test]
    fn test_parameters_reach_expressions() {
        let generators = registry();
        generators
            .load_config(&config(
                r#"
generators:
  hello:
    type: echo
    title: "{{ param(name='who') }}/{{ query_param(name='page') }}/{{ query_params() }}"
"#,
            ))
            .unwrap();

        let parameters = Parameters::from([("who".to_string(), "world".to_string())]);
        let query = parse_query("page=2&page=3&q=a+b");
        let feed = generators.generate("hello", &parameters, &query).unwrap();
        assert_eq!(feed.title, "world/2/page=2&page=3&q=a+b");
    }

    #[test]
    fn test_missing_parameter_is_empty() {
        let generators = registry();
        generators
            .load_config(&config(
                "generators:\n  hello:\n    type: echo\n    title: \"[{{ param(name='nope') }}]\"\n",
            ))
            .unwrap();
        let feed = generators.generate("hello", &Parameters::new(), &QueryParameters::new()).unwrap();
        assert_eq!(feed.title, "[]");
    }

    #[test]
    fn test_endpoints_default_and_evaluated() {
        let generators = registry();
        generators
            .load_config(&config(
                r#"
generators:
  a:
    type: echo
    title: x
  b:
    type: echo
    endpoint: "/feeds/{{ 'b' | upper }}/:id"
    title: x
"#,
            ))
            .unwrap();
        assert_eq!(
            generators.endpoints(),
            vec![
                ("a".to_string(), "/a".to_string()),
                ("b".to_string(), "/feeds/B/:id".to_string())
            ]
        );
    }

    #[test]
    fn test_unknown_type_keeps_previous_table() {
        let generators = registry();
        generators
            .load_config(&config("generators:\n  a:\n    type: echo\n    title: x\n"))
            .unwrap();

        let error = generators
            .load_config(&config("generators:\n  b:\n    type: nope\n"))
            .unwrap_err();
        assert!(matches!(error, FeedgenError::UnknownGeneratorType { .. }));
        assert_eq!(error.category(), ErrorCategory::Configuration);
        assert_eq!(generators.names(), vec!["a".to_string()]);
    }

    #[test]
    fn test_reload_replaces_table() {
        let generators = registry();
        generators
            .load_config(&config("generators:\n  a:\n    type: echo\n    title: x\n"))
            .unwrap();
        generators
            .load_config(&config("generators:\n  b:\n    type: echo\n    title: x\n"))
            .unwrap();
        assert_eq!(generators.names(), vec!["b".to_string()]);
    }

    #[test]
    fn test_invalid_endpoints() {
        let generators = registry();
        let relative = generators.load_config(&config(
            "generators:\n  a:\n    type: echo\n    endpoint: feeds\n    title: x\n",
        ));
        assert!(matches!(relative, Err(FeedgenError::InvalidEndpoint { .. })));

        let duplicate = generators.load_config(&config(
            "generators:\n  a:\n    type: echo\n    endpoint: /x\n    title: x\n  b:\n    type: echo\n    endpoint: /x\n    title: x\n",
        ));
        assert!(matches!(duplicate, Err(FeedgenError::InvalidEndpoint { .. })));
    }

    #[test]
    fn test_bad_options_name_the_generator() {
        let generators = registry();
        let error =
            generators.load_config(&config("generators:\n  a:\n    type: echo\n")).unwrap_err();
        assert!(error.to_string().contains("generator 'a'"));
    }

    #[test]
    fn test_unknown_generator_is_reported() {
        let generators = registry();
        let error =
            generators.generate("missing", &Parameters::new(), &QueryParameters::new()).unwrap_err();
        assert!(matches!(error, FeedgenError::GeneratorNotFound { .. }));
        assert_eq!(error.category(), ErrorCategory::Lookup);
    }

    #[test]
    fn test_panic_becomes_generation_error() {
        let generators = registry();
        generators.load_config(&config("generators:\n  p:\n    type: panic\n")).unwrap();
        let error =
            generators.generate("p", &Parameters::new(), &QueryParameters::new()).unwrap_err();
        assert_eq!(error.category(), ErrorCategory::Evaluation);
        assert!(error.to_string().starts_with("Generator 'p' failed"));
        match error {
            FeedgenError::GenerationFailed {
                source,
                ..
            } => assert!(matches!(*source, FeedgenError::StrategyPanicked { .. })),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_evaluation_error_is_wrapped() {
        let generators = registry();
        generators
            .load_config(&config("generators:\n  e:\n    type: echo\n    title: \"{{ nope(\"\n"))
            .unwrap();
        let error =
            generators.generate("e", &Parameters::new(), &QueryParameters::new()).unwrap_err();
        assert!(matches!(error, FeedgenError::GenerationFailed { .. }));
        assert_eq!(error.category(), ErrorCategory::Evaluation);
    }

    #[test]
    fn test_query_round_trip() {
        let query = parse_query("a=1&b=x%20y&a=2");
        assert_eq!(query["a"], vec!["1".to_string(), "2".to_string()]);
        assert_eq!(encode_query(&query), "a=1&a=2&b=x+y");
    }
}
