use std::collections::HashSet;

use once_cell::sync::Lazy;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::book::{usable_link, Availability, BookRecord, Saleability};

pub const COMMUNITY_SEARCH_URL: &str = "https://www.goodreads.com/search";
pub const MANGA_SEARCH_URL: &str = "https://mangadex.org/search";
const PLAY_STORE_HOST: &str = "https://play.google.com";
const BOOKS_HOST: &str = "https://books.google.com";

static BARE_DOMAIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z0-9][A-Za-z0-9-]*\.)+[A-Za-z]{2,}(/.*)?$").expect("bare domain pattern")
});

pub fn normalize(raw: &str) -> String {
    let link = raw.trim();
    if link.is_empty() {
        return String::new();
    }
    if link.starts_with("http://") || link.starts_with("https://") {
        return link.to_string();
    }
    if link.starts_with("//") {
        return format!("https:{link}");
    }
    if link.starts_with("/store/") {
        return format!("{PLAY_STORE_HOST}{link}");
    }
    if link.starts_with("/books/") {
        return format!("{BOOKS_HOST}{link}");
    }
    if BARE_DOMAIN.is_match(link) {
        return format!("https://{link}");
    }
    // In-app relative routes pass through untouched.
    link.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    Preview,
    Info,
    Buy,
    Community,
    GenreFallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLink {
    pub label: String,
    pub url: String,
    pub kind: LinkKind,
}

impl ResolvedLink {
    fn new<L: Into<String>, U: Into<String>>(label: L, url: U, kind: LinkKind) -> Self {
        Self {
            label: label.into(),
            url: url.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LinkPolicy {
    pub surface_preview: bool,
}

impl Default for LinkPolicy {
    fn default() -> Self {
        Self {
            surface_preview: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ActionSet {
    links: Vec<ResolvedLink>,
    has_primary: bool,
}

impl ActionSet {
    pub fn links(&self) -> &[ResolvedLink] {
        &self.links
    }

    pub fn primary(&self) -> Option<&ResolvedLink> {
        if self.has_primary {
            self.links.first()
        } else {
            None
        }
    }

    pub fn find(&self, kind: LinkKind) -> Option<&ResolvedLink> {
        self.links.iter().find(|link| link.kind == kind)
    }
}

pub fn resolve(record: &BookRecord, availability: Availability, policy: &LinkPolicy) -> ActionSet {
    let community = community_link(record);

    let info = if availability.is_unavailable {
        None
    } else {
        usable_link(record.info_link.as_deref())
            .map(|link| ResolvedLink::new("About this book", normalize(link), LinkKind::Info))
    };

    let buy = if record.saleability == Saleability::ForSale && !availability.is_unavailable {
        usable_link(record.buy_link.as_deref()).map(|link| {
            let label = if record.is_free { "Get free" } else { "Buy" };
            ResolvedLink::new(label, normalize(link), LinkKind::Buy)
        })
    } else {
        None
    };

    let preview = if policy.surface_preview && (record.is_free || availability.has_preview) {
        usable_link(record.preview_link.as_deref())
            .map(|link| ResolvedLink::new("Read preview", normalize(link), LinkKind::Preview))
    } else {
        None
    };

    let genre_fallback = if record.is_manga() && preview.is_none() && buy.is_none() {
        manga_fallback_link(record)
    } else {
        None
    };

    let primary = buy
        .clone()
        .or_else(|| preview.clone())
        .or_else(|| genre_fallback.clone())
        .or_else(|| info.clone());

    let mut ordered = Vec::new();
    let has_primary = primary.is_some();
    if let Some(link) = primary {
        ordered.push(link);
    }
    ordered.push(community);
    ordered.extend(info);
    ordered.extend(buy);
    ordered.extend(genre_fallback);

    let mut seen = HashSet::new();
    ordered.retain(|link| seen.insert(link.url.clone()));

    ActionSet {
        links: ordered,
        has_primary,
    }
}

fn community_link(record: &BookRecord) -> ResolvedLink {
    let query = format!("{} {}", record.title.trim(), record.author.trim());
    let encoded = utf8_percent_encode(query.trim(), NON_ALPHANUMERIC).to_string();
    ResolvedLink::new(
        "Community reviews",
        format!("{COMMUNITY_SEARCH_URL}?q={encoded}"),
        LinkKind::Community,
    )
}

fn manga_fallback_link(record: &BookRecord) -> Option<ResolvedLink> {
    let title = record.title.trim();
    if title.is_empty() {
        return None;
    }
    let encoded = utf8_percent_encode(title, NON_ALPHANUMERIC).to_string();
    Some(ResolvedLink::new(
        "Find on MangaDex",
        format!("{MANGA_SEARCH_URL}?q={encoded}"),
        LinkKind::GenreFallback,
    ))
}

#[derive(Debug, Clone)]
pub struct Card {
    pub record: BookRecord,
    pub availability: Availability,
    pub actions: ActionSet,
}

impl Card {
    pub fn build(record: BookRecord, policy: &LinkPolicy) -> Self {
        let availability = Availability::classify(&record);
        let actions = resolve(&record, availability, policy);
        Self {
            record,
            availability,
            actions,
        }
    }

    pub fn openable(&self) -> bool {
        !self.availability.is_unavailable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::Viewability;

    fn record() -> BookRecord {
        BookRecord {
            id: Some("vol1".into()),
            title: "Vinland Saga".into(),
            author: "Makoto Yukimura".into(),
            cover: Some("https://img.example/v.jpg".into()),
            ..BookRecord::default()
        }
    }

    #[test]
    fn normalize_matches_contract() {
        assert_eq!(normalize("//x.com/a"), "https://x.com/a");
        assert_eq!(
            normalize("/store/books/abc"),
            "https://play.google.com/store/books/abc"
        );
        assert_eq!(
            normalize("/books/reader?id=1"),
            "https://books.google.com/books/reader?id=1"
        );
        assert_eq!(normalize("https://y.com"), "https://y.com");
        assert_eq!(normalize("x.com/a"), "https://x.com/a");
        assert_eq!(normalize("books.google.com/abc"), "https://books.google.com/abc");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("/my_library"), "/my_library");
    }

    #[test]
    fn normalize_is_idempotent() {
        for raw in [
            "//x.com/a",
            "/store/books/abc",
            "/books/reader?id=1",
            "x.com/a",
            "/my_library",
            "",
        ] {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once, "raw input {raw:?}");
        }
    }

    #[test]
    fn unavailable_records_keep_only_community() {
        // For sale, with links, but no preview and not free: unavailable,
        // so neither the info nor the buy entry may surface.
        let mut rec = record();
        rec.info_link = Some("https://books.google.com/info".into());
        rec.buy_link = Some("https://play.google.com/buy".into());
        rec.saleability = Saleability::ForSale;
        let availability = Availability::classify(&rec);
        assert!(availability.is_unavailable);

        let actions = resolve(&rec, availability, &LinkPolicy::default());
        assert!(actions.find(LinkKind::Community).is_some());
        assert!(actions.find(LinkKind::Info).is_none());
        assert!(actions.find(LinkKind::Buy).is_none());
        assert!(actions.primary().is_none());
    }

    #[test]
    fn buy_outranks_preview_as_primary() {
        let mut rec = record();
        rec.preview_link = Some("/books/reader?id=vol1".into());
        rec.viewability = Viewability::Partial;
        rec.saleability = Saleability::ForSale;
        rec.buy_link = Some("/store/books/vol1".into());

        let availability = Availability::classify(&rec);
        let actions = resolve(&rec, availability, &LinkPolicy::default());
        let primary = actions.primary().expect("primary action");
        assert_eq!(primary.kind, LinkKind::Buy);
        assert_eq!(primary.url, "https://play.google.com/store/books/vol1");
    }

    #[test]
    fn preview_policy_demotes_to_info() {
        let mut rec = record();
        rec.preview_link = Some("/books/reader?id=vol1".into());
        rec.viewability = Viewability::Partial;
        rec.info_link = Some("https://books.google.com/info?id=vol1".into());

        let availability = Availability::classify(&rec);
        let surfaced = resolve(&rec, availability, &LinkPolicy::default());
        assert_eq!(surfaced.primary().map(|l| l.kind), Some(LinkKind::Preview));

        let muted = resolve(
            &rec,
            availability,
            &LinkPolicy {
                surface_preview: false,
            },
        );
        assert_eq!(muted.primary().map(|l| l.kind), Some(LinkKind::Info));
        assert!(muted.find(LinkKind::Preview).is_none());
    }

    #[test]
    fn manga_without_usable_links_falls_back_to_search() {
        let mut rec = record();
        rec.categories = vec!["Comics & Graphic Novels / Manga".into()];
        rec.is_free = true;
        rec.preview_link = None;
        rec.buy_link = None;

        let availability = Availability::classify(&rec);
        let actions = resolve(&rec, availability, &LinkPolicy::default());
        let primary = actions.primary().expect("fallback primary");
        assert_eq!(primary.kind, LinkKind::GenreFallback);
        assert!(primary.url.starts_with(MANGA_SEARCH_URL));
    }

    #[test]
    fn missing_title_and_author_degrade_without_panicking() {
        let rec = BookRecord {
            categories: vec!["Manga".into()],
            is_free: true,
            ..BookRecord::default()
        };
        let availability = Availability::classify(&rec);
        let actions = resolve(&rec, availability, &LinkPolicy::default());
        // No title means no genre fallback, but the community entry survives.
        assert!(actions.find(LinkKind::Community).is_some());
        assert!(actions.find(LinkKind::GenreFallback).is_none());
    }

    #[test]
    fn duplicate_urls_are_collapsed() {
        let mut rec = record();
        rec.preview_link = Some("https://books.google.com/same".into());
        rec.info_link = Some("https://books.google.com/same".into());
        rec.viewability = Viewability::AllPages;

        let availability = Availability::classify(&rec);
        let actions = resolve(&rec, availability, &LinkPolicy::default());
        let same_count = actions
            .links()
            .iter()
            .filter(|link| link.url == "https://books.google.com/same")
            .count();
        assert_eq!(same_count, 1);
    }
}
