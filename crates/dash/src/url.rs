use url::Url;

use crate::DashResult;

pub(crate) fn is_absolute_url(s: &str) -> bool {
    s.starts_with("http://")
        || s.starts_with("https://")
        || s.starts_with("file://")
        || s.starts_with("ftp://")
}

/// Resolves `new` against `current`, keeping the query of `current` unless
/// `new` brings its own.
///
/// merge_baseurls(https://example.com/manifest.mpd?auth=secret, /video42.mp4) =>
///   https://example.com/video42.mp4?auth=secret
pub(crate) fn merge_baseurls(current: &Url, new: &str) -> DashResult<Url> {
    if is_absolute_url(new) {
        return Ok(Url::parse(new)?);
    }

    let mut merged = current.join(new)?;
    if merged.query().is_none() {
        merged.set_query(current.query());
    }
    Ok(merged)
}

/// Applies one level of `BaseURL` elements to the inherited alternatives.
///
/// Entry `i` is resolved against parent `i`, or the last parent when there are
/// fewer parents. Without elements at this level the parents are inherited.
pub(crate) fn resolve_base_urls(parents: &[Url], elements: &[String]) -> DashResult<Vec<Url>> {
    if elements.is_empty() {
        return Ok(parents.to_vec());
    }

    elements
        .iter()
        .enumerate()
        .map(|(i, element)| match parents.get(i).or(parents.last()) {
            Some(parent) => merge_baseurls(parent, element),
            None => Ok(Url::parse(element)?),
        })
        .collect()
}
