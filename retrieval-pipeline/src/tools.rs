use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use common::{
    error::AppError,
    storage::{types::metadata::MetadataFilter, vector_store::VectorStore},
};

use crate::llm::{ToolCall, ToolSpec};

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments object.
    fn schema(&self) -> Value;

    async fn execute(&self, args: Value) -> Result<String, AppError>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.schema(),
        }
    }
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `retrieve` scoped to `filter`, plus every numeric helper.
    pub fn for_query(
        store: Arc<dyn VectorStore>,
        filter: Option<MetadataFilter>,
        top_k: usize,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(RetrieveTool::new(store, filter, top_k)));
        for statistic in Statistic::ALL {
            registry.register(Arc::new(StatisticTool(statistic)));
        }
        registry.register(Arc::new(ThresholdFilterTool::AtLeast));
        registry.register(Arc::new(ThresholdFilterTool::AtMost));
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|tool| tool.spec()).collect()
    }

    /// Runs a model-issued call. Failures become the tool's textual result so
    /// the model can see and react to them.
    pub async fn run(&self, call: &ToolCall) -> String {
        let Some(tool) = self.get(&call.name) else {
            warn!(tool = %call.name, "Model requested an unknown tool");
            return format!("Error: unknown tool '{}'", call.name);
        };

        let args: Value = if call.arguments.trim().is_empty() {
            json!({})
        } else {
            match serde_json::from_str(&call.arguments) {
                Ok(args) => args,
                Err(err) => return format!("Error: invalid arguments for {}: {err}", call.name),
            }
        };

        match tool.execute(args).await {
            Ok(output) => {
                debug!(tool = %call.name, chars = output.len(), "Tool executed");
                output
            }
            Err(err) => {
                warn!(tool = %call.name, error = %err, "Tool execution failed");
                format!("Error: {err}")
            }
        }
    }
}

/// Similarity search over the chunk store, restricted by the caller's filter.
pub struct RetrieveTool {
    store: Arc<dyn VectorStore>,
    filter: Option<MetadataFilter>,
    top_k: usize,
}

impl RetrieveTool {
    pub fn new(store: Arc<dyn VectorStore>, filter: Option<MetadataFilter>, top_k: usize) -> Self {
        Self {
            store,
            filter,
            top_k,
        }
    }
}

#[derive(Deserialize)]
struct RetrieveArgs {
    query: String,
}

#[async_trait]
impl Tool for RetrieveTool {
    fn name(&self) -> &str {
        "retrieve"
    }

    fn description(&self) -> &str {
        "Retrieve information related to a query."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "query": { "type": "string" } },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, AppError> {
        let RetrieveArgs { query } = serde_json::from_value(args)?;
        let chunks = self
            .store
            .similarity_search(&query, self.top_k, self.filter.as_ref())
            .await?;

        debug!(query = %query, hits = chunks.len(), "Retrieved context");
        Ok(chunks
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statistic {
    Mean,
    Median,
    TotalSum,
    Variance,
    StandardDeviation,
    DataRange,
    Minimum,
    Maximum,
}

impl Statistic {
    pub const ALL: [Statistic; 8] = [
        Statistic::Mean,
        Statistic::Median,
        Statistic::TotalSum,
        Statistic::Variance,
        Statistic::StandardDeviation,
        Statistic::DataRange,
        Statistic::Minimum,
        Statistic::Maximum,
    ];

    fn name(self) -> &'static str {
        match self {
            Statistic::Mean => "mean",
            Statistic::Median => "median",
            Statistic::TotalSum => "total_sum",
            Statistic::Variance => "variance",
            Statistic::StandardDeviation => "standard_deviation",
            Statistic::DataRange => "data_range",
            Statistic::Minimum => "minimum",
            Statistic::Maximum => "maximum",
        }
    }

    fn description(self) -> &'static str {
        match self {
            Statistic::Mean => "Calculate the mean (average) of a list of numbers.",
            Statistic::Median => "Calculate the median of a list of numbers.",
            Statistic::TotalSum => "Calculate the sum of a list of numbers.",
            Statistic::Variance => "Calculate the variance of a list of numbers.",
            Statistic::StandardDeviation => "Calculate the standard deviation of a list of numbers.",
            Statistic::DataRange => {
                "Calculate the range (difference between max and min) of a list of numbers."
            }
            Statistic::Minimum => "Find the minimum value in a list of numbers.",
            Statistic::Maximum => "Find the maximum value in a list of numbers.",
        }
    }

    /// Population statistics; `None` for an empty list, except the sum which is zero.
    pub fn compute(self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return (self == Statistic::TotalSum).then_some(0.0);
        }
        #[allow(clippy::cast_precision_loss)]
        let count = values.len() as f64;
        let sum: f64 = values.iter().sum();
        let mean = sum / count;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count;

        Some(match self {
            Statistic::Mean => mean,
            Statistic::Median => {
                let mut sorted = values.to_vec();
                sorted.sort_by(f64::total_cmp);
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                } else {
                    sorted[mid]
                }
            }
            Statistic::TotalSum => sum,
            Statistic::Variance => variance,
            Statistic::StandardDeviation => variance.sqrt(),
            Statistic::DataRange => max - min,
            Statistic::Minimum => min,
            Statistic::Maximum => max,
        })
    }
}

#[derive(Deserialize)]
struct NumbersArgs {
    query: Vec<f64>,
}

pub struct StatisticTool(pub Statistic);

#[async_trait]
impl Tool for StatisticTool {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn description(&self) -> &str {
        self.0.description()
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "array", "items": { "type": "number" } }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, AppError> {
        let NumbersArgs { query } = serde_json::from_value(args)?;
        self.0
            .compute(&query)
            .map(|value| value.to_string())
            .ok_or_else(|| {
                AppError::Validation(format!("{} needs at least one number", self.0.name()))
            })
    }
}

#[derive(Deserialize)]
struct ThresholdArgs {
    query: Vec<f64>,
    threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdFilterTool {
    AtLeast,
    AtMost,
}

impl ThresholdFilterTool {
    pub fn apply(self, values: &[f64], threshold: f64) -> Vec<f64> {
        values
            .iter()
            .copied()
            .filter(|value| match self {
                ThresholdFilterTool::AtLeast => *value >= threshold,
                ThresholdFilterTool::AtMost => *value <= threshold,
            })
            .collect()
    }
}

#[async_trait]
impl Tool for ThresholdFilterTool {
    fn name(&self) -> &str {
        match self {
            ThresholdFilterTool::AtLeast => "filter_greater_than_or_equal",
            ThresholdFilterTool::AtMost => "filter_less_than_or_equal",
        }
    }

    fn description(&self) -> &str {
        match self {
            ThresholdFilterTool::AtLeast => {
                "Filter and return values greater than or equal to a given threshold."
            }
            ThresholdFilterTool::AtMost => {
                "Filter and return values less than or equal to a given threshold."
            }
        }
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "array", "items": { "type": "number" } },
                "threshold": { "type": "number" }
            },
            "required": ["query", "threshold"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, AppError> {
        let ThresholdArgs { query, threshold } = serde_json::from_value(args)?;
        Ok(serde_json::to_string(&self.apply(&query, threshold))?)
    }
}
