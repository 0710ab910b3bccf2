// References:
// 1. https://github.com/clitic/vsd/blob/30ca1985e4a467ea3304b11c08d3176deaafd22a/vsd/src/dash/template.rs
// 2. https://github.com/emarsden/dash-mpd-rs/blob/6ebdfb4759adbda8233b5b3520804e23ff86e7de/src/fetch.rs#L435-L466

use regex::{Captures, Regex, Replacer};
use std::{borrow::Cow, collections::HashMap, sync::LazyLock};

// ISO/IEC 23009-1 5.3.9.4.4: `$<Identifier>[%0<width><specifier>]$`, with the
// specifier taken from the IEEE 1003.1 minimal set. `$$` is an escaped `$`.
//
// Example template: "$RepresentationID$/$Number%06d$.m4s"
static TEMPLATE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:(RepresentationID|Number|Time|Bandwidth)(?:%0(\d+)([A-Za-z]))?)?\$")
        .unwrap()
});

const SUPPORTED_SPECIFIERS: [&str; 6] = ["d", "i", "u", "x", "X", "o"];

#[derive(Debug, Default)]
pub struct Template<'a> {
    args: HashMap<&'a str, String>,
}

impl<'a> Template<'a> {
    pub const REPRESENTATION_ID: &'static str = "RepresentationID";
    pub const NUMBER: &'static str = "Number";
    pub const TIME: &'static str = "Time";
    pub const BANDWIDTH: &'static str = "Bandwidth";

    pub fn new() -> Self {
        Self {
            args: HashMap::with_capacity(4),
        }
    }

    pub fn insert(&mut self, key: &'a str, value: String) -> &mut Self {
        self.args.insert(key, value);
        self
    }

    pub fn insert_optional(&mut self, key: &'a str, value: Option<String>) -> &mut Self {
        if let Some(value) = value {
            self.args.insert(key, value);
        }
        self
    }

    /// Substitutes every known identifier in `template`.
    ///
    /// A format tag with an unsupported specifier leaves the whole template
    /// untouched.
    pub fn resolve<'t>(&self, template: &'t str) -> Cow<'t, str> {
        let unsupported = TEMPLATE_REGEX
            .captures_iter(template)
            .filter_map(|caps| caps.get(3))
            .find(|specifier| !SUPPORTED_SPECIFIERS.contains(&specifier.as_str()));
        if let Some(specifier) = unsupported {
            tracing::warn!(
                template,
                specifier = specifier.as_str(),
                "Unsupported format specifier in template"
            );
            return Cow::Borrowed(template);
        }

        TEMPLATE_REGEX.replace_all(template, TemplateReplacer(&self.args))
    }
}

struct TemplateReplacer<'a>(&'a HashMap<&'a str, String>);

impl Replacer for TemplateReplacer<'_> {
    fn replace_append(&mut self, caps: &Captures<'_>, dst: &mut String) {
        let Some(key) = caps.get(1) else {
            // $$
            dst.push('$');
            return;
        };
        let Some(value) = self.0.get(key.as_str()) else {
            dst.push_str(&caps[0]);
            return;
        };

        let width = caps.get(2).and_then(|m| m.as_str().parse::<usize>().ok());
        let specifier = caps.get(3).map(|m| m.as_str()).unwrap_or("d");
        match (width, specifier) {
            (None, _) => dst.push_str(value),
            (Some(width), "x" | "X" | "o") => match value.parse::<u64>() {
                Ok(number) => dst.push_str(&match specifier {
                    "x" => format!("{number:0width$x}"),
                    "X" => format!("{number:0width$X}"),
                    _ => format!("{number:0width$o}"),
                }),
                Err(_) => dst.push_str(value),
            },
            (Some(width), _) => dst.push_str(&format!("{value:0>width$}")),
        }
    }
}

/// Substitutes a single numeric `token` in `url`.
pub fn replace_token_for_template(url: &str, token: &str, value: u64) -> String {
    let mut template = Template::new();
    template.insert(token, value.to_string());
    template.resolve(url).into_owned()
}
