// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use crate::error::StyleConfigError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleCategory {
    pub name: String,
    pub color: String,
    pub icon: String,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaletteEntry {
    pub color: String,
    pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleConfig {
    /// Matched in order; the first category that matches wins.
    pub categories: Vec<StyleCategory>,
    pub fallback_palette: Vec<PaletteEntry>,
}

/// Resolved visual style for one status label. `category` is `None` for hashed fallbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStyle {
    pub category: Option<String>,
    pub color: String,
    pub icon: String,
}

fn category(name: &str, color: &str, icon: &str, keywords: &[&str]) -> StyleCategory {
    StyleCategory {
        name: name.to_string(),
        color: color.to_string(),
        icon: icon.to_string(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
    }
}

fn palette(color: &str, icon: &str) -> PaletteEntry {
    PaletteEntry {
        color: color.to_string(),
        icon: icon.to_string(),
    }
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            categories: vec![
                category(
                    "failure",
                    "#dc2626",
                    "x-circle",
                    &[
                        "failed", "failure", "fail", "error", "rejected", "declined", "denied",
                        "bounced", "lost", "overdue", "expired", "returned",
                    ],
                ),
                category(
                    "cancelled",
                    "#6b7280",
                    "ban",
                    &[
                        "cancelled", "canceled", "cancel", "aborted", "voided", "void",
                        "withdrawn", "abandoned", "terminated",
                    ],
                ),
                category(
                    "warning",
                    "#f59e0b",
                    "alert-triangle",
                    &[
                        "on hold", "hold", "blocked", "escalated", "disputed", "delayed",
                        "suspended", "warning", "attention", "at risk", "backorder",
                    ],
                ),
                category(
                    "success",
                    "#16a34a",
                    "check-circle",
                    &[
                        "completed", "complete", "done", "delivered", "approved", "resolved",
                        "closed", "paid", "success", "successful", "accepted", "won",
                        "fulfilled", "settled", "hired", "finished",
                    ],
                ),
                category(
                    "in_progress",
                    "#2563eb",
                    "loader",
                    &[
                        "in progress", "processing", "running", "active", "shipped",
                        "in transit", "assigned", "working", "under review", "review",
                        "picking", "packing", "captured", "authorized", "interview",
                        "negotiation", "screening",
                    ],
                ),
                category(
                    "pending",
                    "#9333ea",
                    "clock",
                    &[
                        "pending", "new", "open", "created", "draft", "queued", "waiting",
                        "submitted", "scheduled", "received", "requested", "initiated",
                        "applied", "lead", "confirmed",
                    ],
                ),
                category(
                    "informational",
                    "#0ea5e9",
                    "info",
                    &[
                        "info", "note", "updated", "notified", "sent", "viewed", "commented",
                        "qualified", "proposal", "offer",
                    ],
                ),
                category(
                    "neutral",
                    "#64748b",
                    "circle",
                    &["neutral", "other", "inactive", "archived", "idle", "na", "n/a"],
                ),
                category(
                    "unknown",
                    "#94a3b8",
                    "help-circle",
                    &["unknown", "undefined", "unspecified", "null", "none", "tbd"],
                ),
            ],
            fallback_palette: vec![
                palette("#0891b2", "hexagon"),
                palette("#7c3aed", "diamond"),
                palette("#db2777", "star"),
                palette("#65a30d", "square"),
                palette("#ea580c", "triangle"),
                palette("#0d9488", "octagon"),
                palette("#4f46e5", "pentagon"),
                palette("#b45309", "circle-dot"),
            ],
        }
    }
}

impl StyleConfig {
    pub fn validate(&self) -> Result<(), StyleConfigError> {
        if self.fallback_palette.is_empty() {
            return Err(StyleConfigError::EmptyPalette);
        }
        let mut names = HashSet::new();
        for category in &self.categories {
            if category.keywords.is_empty() {
                return Err(StyleConfigError::EmptyCategory {
                    name: category.name.clone(),
                });
            }
            if !names.insert(category.name.as_str()) {
                return Err(StyleConfigError::DuplicateCategory {
                    name: category.name.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Case-folds, trims, treats `_` and `-` as spaces and collapses runs of whitespace.
pub fn normalise_label(label: &str) -> String {
    label
        .trim()
        .to_lowercase()
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Stable palette index: first four bytes of SHA-256 over the normalised label, big-endian, modulo `len`.
pub fn stable_palette_index(normalised: &str, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    let digest = Sha256::digest(normalised.as_bytes());
    let head = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    head as usize % len
}

#[derive(Debug, Clone)]
struct CompiledCategory {
    name: String,
    color: String,
    icon: String,
    keywords: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct StyleResolver {
    categories: Vec<CompiledCategory>,
    palette: Vec<PaletteEntry>,
}

impl StyleResolver {
    pub fn new(config: &StyleConfig) -> Result<Self, StyleConfigError> {
        config.validate()?;
        Ok(Self::compile(config))
    }

    fn compile(config: &StyleConfig) -> Self {
        let categories = config
            .categories
            .iter()
            .map(|c| CompiledCategory {
                name: c.name.clone(),
                color: c.color.clone(),
                icon: c.icon.clone(),
                keywords: c
                    .keywords
                    .iter()
                    .map(|k| normalise_label(k))
                    .filter(|k| !k.is_empty())
                    .collect(),
            })
            .collect();
        Self {
            categories,
            palette: config.fallback_palette.clone(),
        }
    }

    pub fn resolve(&self, status_label: &str) -> NodeStyle {
        let label = normalise_label(status_label);
        if let Some(category) = self.match_category(&label) {
            return NodeStyle {
                category: Some(category.name.clone()),
                color: category.color.clone(),
                icon: category.icon.clone(),
            };
        }
        let entry = &self.palette[stable_palette_index(&label, self.palette.len())];
        NodeStyle {
            category: None,
            color: entry.color.clone(),
            icon: entry.icon.clone(),
        }
    }

    fn match_category(&self, label: &str) -> Option<&CompiledCategory> {
        if label.is_empty() {
            return self.categories.iter().find(|c| c.name == "unknown");
        }
        let words: Vec<&str> = label.split(' ').collect();
        self.categories
            .iter()
            .find(|c| c.keywords.iter().any(|k| contains_words(&words, k)))
            .or_else(|| {
                self.categories
                    .iter()
                    .find(|c| c.keywords.iter().any(|k| k.len() > 2 && label.contains(k.as_str())))
            })
    }
}

impl Default for StyleResolver {
    fn default() -> Self {
        Self::compile(&StyleConfig::default())
    }
}

fn contains_words(words: &[&str], keyword: &str) -> bool {
    let needle: Vec<&str> = keyword.split(' ').collect();
    if needle.is_empty() || needle.len() > words.len() {
        return false;
    }
    words.windows(needle.len()).any(|w| w == needle.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_categories() {
        let resolver = StyleResolver::default();
        assert_eq!(resolver.resolve("Delivered").category.as_deref(), Some("success"));
        assert_eq!(resolver.resolve("  PAYMENT_FAILED ").category.as_deref(), Some("failure"));
        assert_eq!(resolver.resolve("in-progress").category.as_deref(), Some("in_progress"));
        assert_eq!(resolver.resolve("on hold").category.as_deref(), Some("warning"));
        assert_eq!(resolver.resolve("").category.as_deref(), Some("unknown"));
    }

    #[test]
    fn test_word_match_beats_substring() {
        let resolver = StyleResolver::default();
        // whole-word "cancelled" wins over the later whole-word "closed"
        assert_eq!(
            resolver.resolve("cancelled_before_closed").category.as_deref(),
            Some("cancelled")
        );
        assert_eq!(resolver.resolve("preapproved").category.as_deref(), Some("success"));
    }

    #[test]
    fn test_fallback_is_stable() {
        let resolver = StyleResolver::default();
        let first = resolver.resolve("Quarantine Bay 7");
        let second = resolver.resolve("quarantine_bay_7");
        assert!(first.category.is_none());
        assert_eq!(first, second);
        let palette = StyleConfig::default().fallback_palette;
        let index = stable_palette_index("quarantine bay 7", palette.len());
        assert_eq!(first.color, palette[index].color);
    }

    #[test]
    fn test_palette_index_matches_sha256_prefix() {
        // sha256("abc") = ba7816bf...
        assert_eq!(stable_palette_index("abc", 1 << 16), 0xba78_16bf_usize % (1 << 16));
        assert_eq!(stable_palette_index("anything", 0), 0);
    }

    #[test]
    fn test_config_validation() {
        let mut config = StyleConfig::default();
        config.fallback_palette.clear();
        assert_eq!(StyleResolver::new(&config).unwrap_err(), StyleConfigError::EmptyPalette);
        let mut config = StyleConfig::default();
        config.categories.push(config.categories[0].clone());
        assert!(matches!(
            config.validate(),
            Err(StyleConfigError::DuplicateCategory { .. })
        ));
    }
}
