// src/ingest/dedup.rs
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::ingest::types::{ContentItem, ContentKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Create,
    Update,
    Skip,
}

/// Pure decision against the store's `natural_key → content_hash` view.
pub fn classify(item: &ContentItem, existing_by_key: &HashMap<String, String>) -> Decision {
    match existing_by_key.get(&item.natural_key) {
        None => Decision::Create,
        Some(stored) if *stored != item.content_hash => Decision::Update,
        Some(_) => Decision::Skip,
    }
}

/// Headline fingerprint: lowercased alphanumeric words, hashed. Punctuation
/// and spacing variants of one headline collide. `None` for empty titles.
pub fn title_fingerprint(title: &str) -> Option<String> {
    let folded = title
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if folded.is_empty() {
        return None;
    }
    let hex = format!("{:x}", Sha256::digest(folded.as_bytes()));
    Some(hex[..16].to_string())
}

/// Batch wrapper around [`classify`]: every decision is folded back into the
/// local view, so a key seen twice in one batch compares against its first
/// occurrence instead of the stale store snapshot.
///
/// New articles are also checked by headline: an article whose title
/// fingerprint already belongs to another key (syndicated copy under a
/// different URL) is skipped.
#[derive(Debug, Default)]
pub struct Deduplicator {
    view: HashMap<String, String>,
    /// title fingerprint → natural key that owns it
    titles: HashMap<String, String>,
}

impl Deduplicator {
    pub fn new(existing_by_key: HashMap<String, String>) -> Self {
        Self {
            view: existing_by_key,
            titles: HashMap::new(),
        }
    }

    /// Seed the headline view with stored `natural_key → title` pairs.
    pub fn with_titles(mut self, titles: HashMap<String, String>) -> Self {
        for (key, title) in titles {
            if let Some(fp) = title_fingerprint(&title) {
                self.titles.entry(fp).or_insert(key);
            }
        }
        self
    }

    pub fn decide(&mut self, item: &ContentItem) -> Decision {
        let decision = classify(item, &self.view);
        if decision == Decision::Create && item.kind == ContentKind::Article {
            if let Some(fp) = title_fingerprint(&item.title) {
                match self.titles.get(&fp) {
                    Some(owner) if *owner != item.natural_key => return Decision::Skip,
                    Some(_) => {}
                    None => {
                        self.titles.insert(fp, item.natural_key.clone());
                    }
                }
            }
        }
        if decision != Decision::Skip {
            self.view
                .insert(item.natural_key.clone(), item.content_hash.clone());
        }
        decision
    }

    pub fn decide_all(&mut self, items: Vec<ContentItem>) -> Vec<(ContentItem, Decision)> {
        items
            .into_iter()
            .map(|item| {
                let d = self.decide(&item);
                (item, d)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::ContentKind;
    use chrono::{TimeZone, Utc};

    fn item(key: &str, hash: &str) -> ContentItem {
        titled(key, hash, "t")
    }

    fn titled(key: &str, hash: &str, title: &str) -> ContentItem {
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        ContentItem {
            natural_key: key.into(),
            kind: ContentKind::Article,
            title: title.into(),
            body: Some("b".into()),
            published_at: ts,
            media: None,
            source_url: None,
            source_name: None,
            match_details: None,
            source_provider: "p".into(),
            ingested_at: ts,
            content_hash: hash.into(),
        }
    }

    #[test]
    fn create_update_skip() {
        let existing = HashMap::from([("p:1".to_string(), "aaa".to_string())]);
        assert_eq!(classify(&item("p:2", "aaa"), &existing), Decision::Create);
        assert_eq!(classify(&item("p:1", "bbb"), &existing), Decision::Update);
        assert_eq!(classify(&item("p:1", "aaa"), &existing), Decision::Skip);
    }

    #[test]
    fn repeated_key_in_batch_compares_with_first_occurrence() {
        let mut d = Deduplicator::default();
        let out = d.decide_all(vec![item("p:1", "h1"), item("p:1", "h1"), item("p:1", "h2")]);
        let decisions: Vec<_> = out.into_iter().map(|(_, d)| d).collect();
        assert_eq!(
            decisions,
            vec![Decision::Create, Decision::Skip, Decision::Update]
        );
    }

    #[test]
    fn headline_variants_share_a_fingerprint() {
        assert_eq!(
            title_fingerprint("Flamengo vence o Vasco!"),
            title_fingerprint("  flamengo  vence o vasco ")
        );
        assert_ne!(
            title_fingerprint("Flamengo vence o Vasco"),
            title_fingerprint("Flamengo perde para o Vasco")
        );
        assert_eq!(title_fingerprint(" -- "), None);
    }

    #[test]
    fn syndicated_copy_under_another_key_is_skipped() {
        let stored = HashMap::from([("p:old".to_string(), "Flamengo vence o clássico".to_string())]);
        let mut d = Deduplicator::default().with_titles(stored);
        let out = d.decide_all(vec![
            titled("p:a", "h1", "Flamengo vence o clássico!"),
            titled("p:b", "h2", "Gabigol renova contrato"),
            titled("p:c", "h3", "Gabigol renova contrato"),
        ]);
        let decisions: Vec<_> = out.into_iter().map(|(_, d)| d).collect();
        assert_eq!(
            decisions,
            vec![Decision::Skip, Decision::Create, Decision::Skip]
        );
    }
}
