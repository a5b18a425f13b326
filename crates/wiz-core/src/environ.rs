//! Environment variable substitution

use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Compiled regular expression to identify environment variables in string.
    static ref ENV_PATTERN: Regex = Regex::new(r"\$\{(\w+)\}|\$(\w+)").unwrap();
}

/// Substitute all environment variables in *text* from *environment*.
///
/// Unknown references are left as is::
///
///     use indexmap::IndexMap;
///
///     let mut environment = IndexMap::new();
///     environment.insert("HOME".to_string(), "/usr/people/john-doe".to_string());
///
///     assert_eq!(
///         wiz_core::environ::substitute("${HOME}/data", &environment),
///         "/usr/people/john-doe/data"
///     );
pub fn substitute(text: &str, environment: &IndexMap<String, String>) -> String {
    ENV_PATTERN
        .replace_all(text, |captures: &regex::Captures| {
            let name = captures
                .get(1)
                .or_else(|| captures.get(2))
                .map(|group| group.as_str())
                .unwrap_or_default();

            match environment.get(name) {
                Some(value) => value.clone(),
                None => captures[0].to_string(),
            }
        })
        .to_string()
}

/// Indicate whether *text* contains a reference to variable *name*
pub fn contains(text: &str, name: &str) -> bool {
    ENV_PATTERN.captures_iter(text).any(|captures| {
        captures
            .get(1)
            .or_else(|| captures.get(2))
            .map(|group| group.as_str() == name)
            .unwrap_or(false)
    })
}

/// Return sanitised environment *mapping*.
///
/// Remaining self-references are removed: a reference followed by a path
/// separator disappears with it, while a trailing reference collapses and
/// keeps the separator before it (so "PATH" augmentation values stay
/// appendable). A last substitution pass then resolves cross-references.
/// The substitution does not iterate to a fixpoint: references which are
/// still unresolved afterwards stay literal and are reported with a
/// warning.
pub fn sanitise(mapping: &IndexMap<String, String>) -> IndexMap<String, String> {
    let mut sanitised: IndexMap<String, String> = IndexMap::new();

    for (key, value) in mapping {
        let escaped = regex::escape(key);
        let pattern = Regex::new(&format!(
            r"(\$\{{{0}\}}:|\$\{{{0}\}}|\${0}\b:|\${0}\b)",
            escaped
        ))
        .expect("escaped variable name forms a valid pattern");

        sanitised.insert(key.clone(), pattern.replace_all(value, "").to_string());
    }

    let reference = sanitised.clone();

    for (key, value) in sanitised.iter_mut() {
        *value = substitute(value, &reference);

        if ENV_PATTERN.is_match(value) {
            log::warn!("The '{}' variable contains unresolved references: {}", key, value);
        }
    }

    sanitised
}
