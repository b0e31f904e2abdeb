//! Ordered extraction strategies over parsed HTML.
//!
//! Site markup changes often, so each field is read through a list of
//! candidates tried in order until one yields a non-empty value.

use scraper::{ElementRef, Html, Selector};

/// Run each strategy in order and return the first `Some`
pub fn first_some<I: ?Sized, T>(strategies: &[fn(&I) -> Option<T>], input: &I) -> Option<T> {
    strategies.iter().find_map(|strategy| strategy(input))
}

fn parse_selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(sel) => Some(sel),
        Err(e) => {
            log::warn!("Invalid selector {:?}: {:?}", css, e);
            None
        }
    }
}

/// All elements under `el` matching `css`; invalid selectors match nothing
pub fn select_all<'a>(el: ElementRef<'a>, css: &str) -> Vec<ElementRef<'a>> {
    match parse_selector(css) {
        Some(sel) => el.select(&sel).collect(),
        None => Vec::new(),
    }
}

pub fn select_first<'a>(el: ElementRef<'a>, css: &str) -> Option<ElementRef<'a>> {
    let sel = parse_selector(css)?;
    el.select(&sel).next()
}

/// Document-level variant of [`select_all`]
pub fn select_doc<'a>(doc: &'a Html, css: &str) -> Vec<ElementRef<'a>> {
    select_all(doc.root_element(), css)
}

/// Whitespace-normalized text of an element
pub fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn attr_of(el: ElementRef<'_>, attr: &str) -> Option<String> {
    el.value()
        .attr(attr)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Text of the first selector in `candidates` that yields non-empty text
pub fn first_text(el: ElementRef<'_>, candidates: &[&str]) -> Option<String> {
    candidates.iter().find_map(|css| {
        select_all(el, css)
            .into_iter()
            .map(text_of)
            .find(|t| !t.is_empty())
    })
}

/// First non-empty attribute value among `(selector, attribute)` candidates
pub fn first_attr(el: ElementRef<'_>, candidates: &[(&str, &str)]) -> Option<String> {
    candidates.iter().find_map(|(css, attr)| {
        select_all(el, css)
            .into_iter()
            .find_map(|node| attr_of(node, attr))
    })
}

const IMAGE_ATTRS: &[&str] = &["data-src", "data-lazy-src", "data-original", "src"];

/// Real image URL of an `<img>`, skipping inline placeholders used by lazy loaders
pub fn image_source(img: ElementRef<'_>) -> Option<String> {
    let from_attrs = IMAGE_ATTRS
        .iter()
        .filter_map(|attr| attr_of(img, attr))
        .find(|v| !v.starts_with("data:"));

    from_attrs.or_else(|| {
        attr_of(img, "srcset")
            .or_else(|| attr_of(img, "data-srcset"))
            .and_then(|set| set.split(',').next().map(str::to_string))
            .and_then(|entry| entry.split_whitespace().next().map(str::to_string))
    })
}

/// First usable image source among the `<img>` elements under `el`
pub fn first_image(el: ElementRef<'_>, candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .find_map(|css| select_all(el, css).into_iter().find_map(image_source))
}

/// Walk up to `depth` ancestors of `el`
pub fn ancestors(el: ElementRef<'_>, depth: usize) -> Vec<ElementRef<'_>> {
    el.ancestors().filter_map(ElementRef::wrap).take(depth).collect()
}
