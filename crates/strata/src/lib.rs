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

pub mod builder;
pub mod catalogue;
pub mod detector;
pub mod error;
pub mod flow;
pub mod layout;
pub mod style;

pub use builder::ProcessGraphBuilder;
pub use catalogue::{normalise_stage, ProcessCatalogue, ProcessTypeDef};
pub use detector::{
    ColumnHints, ColumnRoles, DetectorConfig, ProcessDetection, ProcessDetector, ResultShape,
};
pub use error::{GraphError, Result, StrataError, StyleConfigError};
pub use flow::{
    Bottleneck, BottleneckKind, GraphStrategy, NodeRole, ProcessEdge, ProcessFlowConfig,
    ProcessNode,
};
pub use layout::{GraphLayoutEngine, LayoutConfig, LayoutDirection, LayoutResult, Position};
pub use style::{NodeStyle, StyleConfig, StyleResolver};

use lens_contracts::TabularResult;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Visualisation {
    pub detection: ProcessDetection,
    pub flow: Option<ProcessFlowConfig>,
}

/// Detection plus graph construction behind one call.
pub struct ProcessVisualiser {
    detector: ProcessDetector,
    builder: ProcessGraphBuilder,
}

impl ProcessVisualiser {
    pub fn new(
        styles: &StyleConfig,
        catalogue: ProcessCatalogue,
        layout: LayoutConfig,
        detector: DetectorConfig,
    ) -> Result<Self> {
        let resolver = StyleResolver::new(styles)?;
        let builder =
            ProcessGraphBuilder::new(resolver, catalogue.clone(), layout, detector.columns.clone());
        Ok(Self {
            detector: ProcessDetector::new(detector, catalogue),
            builder,
        })
    }

    pub fn detect(&self, question: &str, result: &TabularResult) -> ProcessDetection {
        self.detector.detect(question, result)
    }

    /// Builds a flow only when the result is classified as process-shaped.
    pub fn visualise(&self, question: &str, result: &TabularResult, query_text: &str) -> Result<Visualisation> {
        let detection = self.detector.detect(question, result);
        let flow = if detection.is_process {
            self.builder
                .build(result, detection.process_type.as_deref(), query_text)
        } else {
            None
        };
        if let Some(flow) = &flow {
            flow.validate()?;
        }
        Ok(Visualisation { detection, flow })
    }

    /// Builds a flow regardless of detection confidence.
    pub fn build(
        &self,
        result: &TabularResult,
        process_type: Option<&str>,
        query_text: &str,
    ) -> Option<ProcessFlowConfig> {
        self.builder.build(result, process_type, query_text)
    }

    pub fn with_direction(mut self, direction: LayoutDirection) -> Self {
        let mut layout = *self.builder.layout_config();
        layout.direction = direction;
        self.builder = self.builder.with_layout(layout);
        self
    }
}

impl Default for ProcessVisualiser {
    fn default() -> Self {
        Self {
            detector: ProcessDetector::default(),
            builder: ProcessGraphBuilder::default(),
        }
    }
}
