use serde::{Deserialize, Serialize};

pub const PLACEHOLDER_LINK: &str = "#";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Viewability {
    AllPages,
    Partial,
    NoPages,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Saleability {
    ForSale,
    Free,
    #[default]
    #[serde(other)]
    NotForSale,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BookRecord {
    pub id: Option<String>,
    pub title: String,
    pub author: String,
    pub description: Option<String>,
    pub cover: Option<String>,
    pub categories: Vec<String>,
    pub published_date: Option<String>,
    pub preview_link: Option<String>,
    pub info_link: Option<String>,
    pub buy_link: Option<String>,
    pub viewability: Viewability,
    pub saleability: Saleability,
    pub is_free: bool,
    pub rating: Option<f64>,
}

impl BookRecord {
    pub fn display_title(&self) -> &str {
        let title = self.title.trim();
        if title.is_empty() {
            "Untitled"
        } else {
            title
        }
    }

    pub fn display_author(&self) -> &str {
        let author = self.author.trim();
        if author.is_empty() {
            "Unknown Author"
        } else {
            author
        }
    }

    pub fn has_cover(&self) -> bool {
        self.cover
            .as_deref()
            .map(|cover| !cover.trim().is_empty())
            .unwrap_or(false)
    }

    pub fn year(&self) -> Option<i32> {
        self.published_date
            .as_deref()
            .and_then(|date| date.get(..4))
            .and_then(|year| year.parse().ok())
    }

    pub fn genre(&self) -> Option<&str> {
        self.categories
            .iter()
            .map(|category| category.trim())
            .find(|category| !category.is_empty())
    }

    pub fn is_manga(&self) -> bool {
        self.categories
            .iter()
            .any(|category| category.to_lowercase().contains("manga"))
    }
}

pub(crate) fn usable_link(link: Option<&str>) -> Option<&str> {
    let link = link?.trim();
    if link.is_empty() || link == PLACEHOLDER_LINK {
        return None;
    }
    Some(link)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Free,
    PreviewOnly,
    SaleOnly,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Availability {
    pub has_preview: bool,
    pub is_unavailable: bool,
    pub tier: Tier,
}

impl Availability {
    pub fn classify(record: &BookRecord) -> Self {
        let has_preview = usable_link(record.preview_link.as_deref()).is_some()
            && record.viewability != Viewability::NoPages;
        // Free records are always reachable, whatever their link state.
        let is_unavailable = !has_preview && !record.is_free;
        let tier = if record.is_free {
            Tier::Free
        } else if has_preview {
            Tier::PreviewOnly
        } else if record.saleability == Saleability::ForSale {
            Tier::SaleOnly
        } else {
            Tier::Unavailable
        };
        Availability {
            has_preview,
            is_unavailable,
            tier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> BookRecord {
        BookRecord {
            id: Some("vol1".into()),
            title: "Dune".into(),
            author: "Frank Herbert".into(),
            preview_link: Some("https://books.google.com/books?id=vol1".into()),
            viewability: Viewability::Partial,
            ..BookRecord::default()
        }
    }

    #[test]
    fn previewable_when_link_present_and_pages_exist() {
        let availability = Availability::classify(&record());
        assert!(availability.has_preview);
        assert!(!availability.is_unavailable);
        assert_eq!(availability.tier, Tier::PreviewOnly);
    }

    #[test]
    fn placeholder_preview_link_is_not_a_preview() {
        let mut rec = record();
        rec.preview_link = Some("#".into());
        let availability = Availability::classify(&rec);
        assert!(!availability.has_preview);
        assert!(availability.is_unavailable);
    }

    #[test]
    fn no_pages_viewability_blocks_preview() {
        let mut rec = record();
        rec.viewability = Viewability::NoPages;
        assert!(!Availability::classify(&rec).has_preview);
    }

    #[test]
    fn free_records_are_never_unavailable() {
        let mut rec = record();
        rec.preview_link = None;
        rec.viewability = Viewability::NoPages;
        rec.is_free = true;
        let availability = Availability::classify(&rec);
        assert!(!availability.is_unavailable);
        assert_eq!(availability.tier, Tier::Free);
    }

    #[test]
    fn for_sale_without_preview_gets_sale_badge() {
        let mut rec = record();
        rec.preview_link = None;
        rec.saleability = Saleability::ForSale;
        let availability = Availability::classify(&rec);
        assert!(availability.is_unavailable);
        assert_eq!(availability.tier, Tier::SaleOnly);
    }

    #[test]
    fn decodes_camel_case_payload() {
        let raw = r#"{
            "id": "abc",
            "title": "Berserk",
            "author": "Kentaro Miura",
            "publishedDate": "1990-11-26",
            "previewLink": "/books/reader?id=abc",
            "isFree": false,
            "viewability": "PARTIAL",
            "saleability": "FOR_SALE",
            "categories": ["Comics & Graphic Novels / Manga"]
        }"#;
        let rec: BookRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(rec.preview_link.as_deref(), Some("/books/reader?id=abc"));
        assert_eq!(rec.year(), Some(1990));
        assert!(rec.is_manga());
        assert_eq!(rec.saleability, Saleability::ForSale);
    }

    #[test]
    fn unknown_enum_strings_fold_to_defaults() {
        let raw = r#"{"title": "X", "viewability": "SAMPLE", "saleability": "SOMEDAY"}"#;
        let rec: BookRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(rec.viewability, Viewability::Unknown);
        assert_eq!(rec.saleability, Saleability::NotForSale);
    }

    #[test]
    fn missing_fields_default_instead_of_failing() {
        let rec: BookRecord = serde_json::from_str("{}").unwrap();
        assert_eq!(rec.display_title(), "Untitled");
        assert_eq!(rec.display_author(), "Unknown Author");
        assert!(!Availability::classify(&rec).has_preview);
    }

    #[test]
    fn year_ignores_malformed_dates() {
        let mut rec = record();
        rec.published_date = Some("circa 1965".into());
        assert_eq!(rec.year(), None);
        rec.published_date = Some("1965".into());
        assert_eq!(rec.year(), Some(1965));
    }
}
