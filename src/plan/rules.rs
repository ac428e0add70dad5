//! Loader rule catalog

use regex::RegexBuilder;
use serde::Serialize;
use serde_json::{json, Value};

use super::{gated, ConfigBuilder};
use crate::utils::path_string;

const URL_LOADER_LIMIT: u64 = 5000;

/// Raw-inlined file types for server bundles
const NODE_INLINE_TEST: &str =
    r"\.(css|scss|less|woff|ttf|eot|woff2|svg|ico|otf|webp|png|jpg|jpeg|gif|html|mp4|webm)$";

/// One loader in a chain
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoaderSpec {
    pub loader: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

impl LoaderSpec {
    pub fn new(loader: &str) -> Self {
        Self {
            loader: loader.to_string(),
            options: None,
        }
    }

    pub fn with_options(loader: &str, options: Value) -> Self {
        Self {
            loader: loader.to_string(),
            options: Some(options),
        }
    }
}

/// File pattern plus the loader chain applied to matching files
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub test: String,
    pub ignore_case: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude: Option<String>,
    #[serde(rename = "use")]
    pub chain: Vec<LoaderSpec>,
    /// Emit into a separate stylesheet, `style-loader` as fallback
    pub extract: bool,
}

impl Rule {
    fn new(test: &str, chain: Vec<LoaderSpec>) -> Self {
        Self {
            test: test.to_string(),
            ignore_case: false,
            exclude: None,
            chain,
            extract: false,
        }
    }

    fn excluding(mut self, pattern: &str) -> Self {
        self.exclude = Some(pattern.to_string());
        self
    }

    /// Whether this rule claims a file path
    pub fn matches(&self, file: &str) -> bool {
        let test = RegexBuilder::new(&self.test)
            .case_insensitive(self.ignore_case)
            .build()
            .map(|re| re.is_match(file))
            .unwrap_or(false);

        let excluded = self
            .exclude
            .as_deref()
            .and_then(|pattern| RegexBuilder::new(pattern).build().ok())
            .map(|re| re.is_match(file))
            .unwrap_or(false);

        test && !excluded
    }

    pub fn loader(&self, name: &str) -> Option<&LoaderSpec> {
        self.chain.iter().find(|l| l.loader == name)
    }

    pub fn loader_names(&self) -> Vec<&str> {
        self.chain.iter().map(|l| l.loader.as_str()).collect()
    }

    /// Whether `css-loader` runs with class name scoping
    pub fn scopes_class_names(&self) -> bool {
        self.loader("css-loader")
            .and_then(|l| l.options.as_ref())
            .and_then(|o| o.get("modules"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// A single rule, or alternatives where the first match wins
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RuleSet {
    Single(Rule),
    OneOf {
        #[serde(rename = "oneOf")]
        one_of: Vec<Rule>,
    },
}

impl RuleSet {
    /// The rule that would handle a file
    pub fn resolve(&self, file: &str) -> Option<&Rule> {
        match self {
            RuleSet::Single(rule) => rule.matches(file).then_some(rule),
            RuleSet::OneOf { one_of } => one_of.iter().find(|rule| rule.matches(file)),
        }
    }
}

/// Declarative babel configuration shared by the bundler and the test runner
pub fn babel_options(react: bool, watch: bool, node: bool, test: bool, src: &str) -> Value {
    let plugins: Vec<Value> = gated([
        (true, json!(["babel-root-slash-import", { "rootPathSuffix": src }])),
        (true, json!("babel-plugin-transform-runtime")),
        (true, json!("babel-plugin-transform-decorators-legacy")),
        (true, json!("babel-plugin-transform-class-properties")),
        (true, json!("babel-plugin-transform-function-bind")),
        (true, json!("babel-plugin-transform-object-rest-spread")),
        (react && watch && !node && !test, json!("react-hot-loader/babel")),
    ]);

    // test runs need modules transpiled
    let es2015 = if test {
        json!(["babel-preset-es2015", {}])
    } else {
        json!(["babel-preset-es2015", { "modules": false }])
    };

    json!({
        "babelrc": false,
        "ignore": "node_modules",
        "presets": ["babel-preset-react", es2015, "babel-preset-es2016", "babel-preset-es2017"],
        "plugins": plugins,
    })
}

impl ConfigBuilder {
    pub(super) fn module_rules(&self) -> Vec<RuleSet> {
        let o = &self.options;
        let browser = !o.node;

        gated([
            (true, RuleSet::Single(self.script_rule())),
            (
                true,
                RuleSet::Single(Rule::new(
                    r"\.yaml$",
                    vec![LoaderSpec::new("json-loader"), LoaderSpec::new("yaml-loader")],
                )),
            ),
            (
                true,
                RuleSet::Single(Rule::new(r"\.coffee$", vec![LoaderSpec::new("coffee-loader")])),
            ),
            (
                browser,
                RuleSet::Single(
                    Rule::new(r"\.(graphql|gql)$", vec![LoaderSpec::new("graphql-tag/loader")])
                        .excluding("node_modules"),
                ),
            ),
            (browser, self.style_rules("css", None)),
            (browser, self.style_rules("scss", Some("sass"))),
            (browser, self.style_rules("less", Some("less"))),
            (browser, RuleSet::Single(self.image_rule())),
            (
                browser,
                RuleSet::Single(Rule::new(r"\.(webp)$", vec![self.url_loader("images", false)])),
            ),
            (
                browser,
                RuleSet::Single(Rule::new(r"\.html$", vec![LoaderSpec::new("raw-loader")])),
            ),
            (true, RuleSet::Single(self.template_rule())),
            (
                browser,
                RuleSet::Single(Rule::new(
                    r"\.(woff|ttf|eot|woff2|otf)$",
                    vec![self.url_loader("fonts", false)],
                )),
            ),
            (
                browser,
                RuleSet::Single(Rule::new(
                    r"\.(ico|mp4|webm)$",
                    vec![self.url_loader("media", false)],
                )),
            ),
            (
                o.node,
                RuleSet::Single(Rule::new(NODE_INLINE_TEST, vec![LoaderSpec::new("raw-loader")])),
            ),
        ])
    }

    fn src_root(&self) -> String {
        path_string(&self.options.src_dir())
    }

    fn script_rule(&self) -> Rule {
        let o = &self.options;
        let mut options = babel_options(o.react, o.watch, o.node, o.test, &o.src);

        if o.dev_mode() {
            let cache = path_string(&o.root.join("node_modules").join(".cache").join("pack"));
            options["cacheDirectory"] = json!(cache);
        }

        Rule::new(r"\.jsx?$", vec![LoaderSpec::with_options("babel-loader", options)])
            .excluding("node_modules")
    }

    fn image_rule(&self) -> Rule {
        let chain = gated([
            (true, self.url_loader("images", true)),
            (
                !self.options.dev_mode(),
                LoaderSpec::with_options(
                    "image-webpack-loader",
                    json!({
                        "optipng": { "optimizationLevel": 7 },
                        "gifsicle": { "interlaced": false },
                    }),
                ),
            ),
        ]);

        Rule::new(r"\.(png|jpg|jpeg|gif|svg)$", chain)
    }

    fn template_rule(&self) -> Rule {
        Rule::new(
            r"\.(pug|jade)$",
            vec![LoaderSpec::with_options(
                "pug-loader",
                json!({ "root": self.src_root(), "basedir": self.src_root() }),
            )],
        )
    }

    fn url_loader(&self, dir: &str, rooted: bool) -> LoaderSpec {
        let mut options = json!({
            "limit": URL_LOADER_LIMIT,
            "name": format!("{}[name].[hash:base64:6].[ext]", self.options.prefix(dir)),
        });
        if rooted {
            options["root"] = json!(self.src_root());
        }
        LoaderSpec::with_options("url-loader", options)
    }

    /// Both alternatives for one stylesheet extension.
    ///
    /// With css modules on, `.global.<ext>` opts out of scoping; with them
    /// off, `.module.<ext>` opts in.
    fn style_rules(&self, extension: &str, parser: Option<&str>) -> RuleSet {
        let (special, special_scoped) = if self.options.cssmodules {
            ("global", false)
        } else {
            ("module", true)
        };

        RuleSet::OneOf {
            one_of: vec![
                self.style_rule(&format!(r"\.{}\.{}$", special, extension), special_scoped, parser),
                self.style_rule(&format!(r"\.{}$", extension), !special_scoped, parser),
            ],
        }
    }

    fn style_rule(&self, test: &str, scoped: bool, parser: Option<&str>) -> Rule {
        let dev_mode = self.options.dev_mode();
        let local_ident_name = if dev_mode {
            "[name]__[local]___[hash:base64:5]"
        } else {
            "[hash:base64]"
        };

        let chain = gated([
            (dev_mode, LoaderSpec::new("style-loader")),
            (
                true,
                LoaderSpec::with_options(
                    "css-loader",
                    json!({
                        "modules": scoped,
                        "localIdentName": local_ident_name,
                        "autoprefixer": false,
                        "root": self.src_root(),
                        "importLoaders": 1,
                    }),
                ),
            ),
            (true, LoaderSpec::new("postcss-loader")),
            (
                parser.is_some(),
                LoaderSpec::with_options(
                    &format!("{}-loader", parser.unwrap_or_default()),
                    json!({ "includePaths": [self.src_root()], "root": self.src_root() }),
                ),
            ),
        ]);

        Rule {
            test: test.to_string(),
            ignore_case: true,
            exclude: None,
            chain,
            extract: !dev_mode,
        }
    }
}
