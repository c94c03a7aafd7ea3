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

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessTypeDef {
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Known-good stage order used when the data alone does not imply one.
    #[serde(default)]
    pub canonical_sequence: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessCatalogue {
    pub types: Vec<ProcessTypeDef>,
}

fn def(name: &str, display: &str, keywords: &[&str], sequence: &[&str]) -> ProcessTypeDef {
    ProcessTypeDef {
        name: name.to_string(),
        display_name: display.to_string(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        canonical_sequence: sequence.iter().map(|s| s.to_string()).collect(),
    }
}

impl Default for ProcessCatalogue {
    fn default() -> Self {
        Self {
            types: vec![
                def(
                    "order_fulfillment",
                    "Order fulfillment",
                    &["order", "orders", "fulfillment", "fulfilment", "shipping", "delivery", "shipment"],
                    &["pending", "confirmed", "processing", "shipped", "delivered"],
                ),
                def(
                    "support_ticket",
                    "Support ticket",
                    &["ticket", "tickets", "support", "incident", "issue", "case", "helpdesk"],
                    &["open", "assigned", "in_progress", "resolved", "closed"],
                ),
                def(
                    "approval",
                    "Approval workflow",
                    &["approval", "approve", "approvals", "review", "sign-off", "signoff"],
                    &["draft", "submitted", "under_review", "approved"],
                ),
                def(
                    "payment",
                    "Payment lifecycle",
                    &["payment", "payments", "invoice", "invoices", "billing", "transaction"],
                    &["initiated", "authorized", "captured", "settled"],
                ),
                def(
                    "recruitment",
                    "Recruitment pipeline",
                    &["candidate", "candidates", "applicant", "hiring", "recruitment", "recruiting"],
                    &["applied", "screening", "interview", "offer", "hired"],
                ),
                def(
                    "sales_pipeline",
                    "Sales pipeline",
                    &["lead", "leads", "deal", "deals", "opportunity", "opportunities", "sales"],
                    &["lead", "qualified", "proposal", "negotiation", "won"],
                ),
            ],
        }
    }
}

/// Lowercase, `snake_case` form used for comparing stage names.
pub fn normalise_stage(value: &str) -> String {
    value
        .trim()
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

fn question_words(question: &str) -> HashSet<String> {
    question
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

impl ProcessCatalogue {
    pub fn get(&self, name: &str) -> Option<&ProcessTypeDef> {
        self.types.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// The type whose keywords occur most often in the question; ties go to catalogue order.
    pub fn match_question(&self, question: &str) -> Option<&ProcessTypeDef> {
        let words = question_words(question);
        let mut best: Option<(&ProcessTypeDef, usize)> = None;
        for t in &self.types {
            let hits = t
                .keywords
                .iter()
                .filter(|k| words.contains(&k.to_lowercase()))
                .count();
            if hits > 0 && best.map_or(true, |(_, b)| hits > b) {
                best = Some((t, hits));
            }
        }
        best.map(|(t, _)| t)
    }

    /// Best type by overlap between observed stage values and a canonical sequence.
    /// Requires at least two shared stages.
    pub fn match_statuses<S: AsRef<str>>(&self, values: &[S]) -> Option<(&ProcessTypeDef, f64)> {
        let observed: HashSet<String> = values.iter().map(|v| normalise_stage(v.as_ref())).collect();
        if observed.is_empty() {
            return None;
        }
        let mut best: Option<(&ProcessTypeDef, usize, f64)> = None;
        for t in &self.types {
            let shared = t
                .canonical_sequence
                .iter()
                .filter(|s| observed.contains(&normalise_stage(s)))
                .count();
            if shared < 2 {
                continue;
            }
            let ratio = shared as f64 / observed.len().max(t.canonical_sequence.len()) as f64;
            if best.map_or(true, |(_, b, _)| shared > b) {
                best = Some((t, shared, ratio));
            }
        }
        best.map(|(t, _, ratio)| (t, ratio))
    }
}

impl ProcessTypeDef {
    pub fn canonical_rank(&self, value: &str) -> Option<usize> {
        let wanted = normalise_stage(value);
        self.canonical_sequence
            .iter()
            .position(|s| normalise_stage(s) == wanted)
    }
}
