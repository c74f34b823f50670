//! Human-readable overview of a loaded dataset

use std::fmt;

use dpf_core::{DatasetConfig, DatasetFormat, ModalityKind, SampleTable};

use crate::DataError;

const WIDTH_COLUMNS: [&str; 3] = ["width", "WIDTH", "w"];
const HEIGHT_COLUMNS: [&str; 3] = ["height", "HEIGHT", "h"];

/// Descriptive statistics of a numeric column
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColumnStats {
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation; zero for a single value
    pub std: f64,
    pub min: f64,
    pub q25: f64,
    pub median: f64,
    pub q75: f64,
    pub max: f64,
}

impl ColumnStats {
    /// Statistics over the finite values; `None` when there are none
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(f64::total_cmp);

        let n = sorted.len();
        let mean = sorted.iter().sum::<f64>() / n as f64;
        let std = if n > 1 {
            let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
            variance.sqrt()
        } else {
            0.0
        };

        Some(Self {
            count: n,
            mean,
            std,
            min: sorted[0],
            q25: quantile(&sorted, 0.25),
            median: quantile(&sorted, 0.5),
            q75: quantile(&sorted, 0.75),
            max: sorted[n - 1],
        })
    }
}

/// Linear interpolation between the closest ranks of a sorted, non-empty slice
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let idx = (sorted.len() - 1) as f64 * q;
    let lower = idx.floor() as usize;
    let upper = idx.ceil() as usize;
    if lower == upper || upper >= sorted.len() {
        sorted[lower]
    } else {
        let fraction = idx - lower as f64;
        sorted[lower] * (1.0 - fraction) + sorted[upper] * fraction
    }
}

impl fmt::Display for ColumnStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "count {} | mean {:.2} | std {:.2} | min {:.2} | 25% {:.2} | 50% {:.2} | 75% {:.2} | max {:.2}",
            self.count, self.mean, self.std, self.min, self.q25, self.median, self.q75, self.max
        )
    }
}

/// Overview of a dataset as loaded in memory
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSummary {
    pub format: DatasetFormat,
    pub path: String,
    pub modalities: Vec<ModalityKind>,
    pub num_columns: usize,
    pub num_samples: usize,
    pub width: Option<ColumnStats>,
    pub height: Option<ColumnStats>,
    /// Width divided by height, over rows where both are known
    pub aspect_ratio: Option<ColumnStats>,
}

impl DatasetSummary {
    pub fn new(table: &SampleTable, config: &DatasetConfig) -> Result<Self, DataError> {
        let widths = numeric_column(table, &WIDTH_COLUMNS)?;
        let heights = numeric_column(table, &HEIGHT_COLUMNS)?;

        let aspect_ratio = match (&widths, &heights) {
            (Some(widths), Some(heights)) => {
                let ratios: Vec<f64> = widths
                    .iter()
                    .zip(heights)
                    .filter_map(|(w, h)| match (w, h) {
                        (Some(w), Some(h)) if *h != 0.0 => Some(w / h),
                        _ => None,
                    })
                    .collect();
                ColumnStats::from_values(&ratios)
            }
            _ => None,
        };

        Ok(Self {
            format: config.format(),
            path: config.path().to_string(),
            modalities: config.modalities(),
            num_columns: table.num_columns(),
            num_samples: table.num_rows(),
            width: widths.as_deref().and_then(stats_of),
            height: heights.as_deref().and_then(stats_of),
            aspect_ratio,
        })
    }
}

/// Values of the first present column among `candidates`, as numbers
fn numeric_column(table: &SampleTable, candidates: &[&str]) -> Result<Option<Vec<Option<f64>>>, DataError> {
    let Some(column) = candidates.iter().find(|c| table.has_column(c)) else {
        return Ok(None);
    };
    let values = table.values(column)?;
    Ok(Some(values.iter().map(|v| v.as_f64()).collect()))
}

fn stats_of(values: &[Option<f64>]) -> Option<ColumnStats> {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    ColumnStats::from_values(&present)
}

impl fmt::Display for DatasetSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let modalities: Vec<&str> = self.modalities.iter().map(|m| m.key()).collect();
        writeln!(f, "Dataset format: {}", self.format)?;
        writeln!(f, "Path: {}", self.path)?;
        writeln!(f, "Modalities: {}", modalities.join(", "))?;
        writeln!(f, "Number of columns: {}", self.num_columns)?;
        writeln!(f, "Total samples: {}", self.num_samples)?;
        if let Some(width) = &self.width {
            writeln!(f, "Width: {}", width)?;
        }
        if let Some(height) = &self.height {
            writeln!(f, "Height: {}", height)?;
        }
        if let Some(ratio) = &self.aspect_ratio {
            writeln!(f, "Aspect ratio: {}", ratio)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use dpf_core::{DataType, FilesDatasetConfig, Value};
    use indexmap::IndexMap;

    use super::*;

    #[test]
    fn test_quartiles_interpolate() {
        let stats = ColumnStats::from_values(&[4.0, 1.0, 3.0, 2.0]).unwrap();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.q25, 1.75);
        assert_eq!(stats.median, 2.5);
        assert_eq!(stats.max, 4.0);
        assert!((stats.std - 1.2909944).abs() < 1e-6);
        assert!(ColumnStats::from_values(&[f64::NAN]).is_none());
    }

    #[test]
    fn test_summary_with_sizes() {
        let config: DatasetConfig =
            FilesDatasetConfig::new("/data/table.csv", vec![DataType::file(ModalityKind::Image, None)])
                .unwrap()
                .into();
        let mut columns = IndexMap::new();
        columns.insert("image_path".to_string(), vec![Value::from("/data/a.jpg"), Value::from("/data/b.jpg")]);
        columns.insert("WIDTH".to_string(), vec![Value::Int(200), Value::Int(300)]);
        columns.insert("HEIGHT".to_string(), vec![Value::Int(100), Value::Null]);
        let table = SampleTable::from_columns(columns).unwrap();

        let summary = DatasetSummary::new(&table, &config).unwrap();
        assert_eq!(summary.num_samples, 2);
        assert_eq!(summary.num_columns, 3);
        assert_eq!(summary.width.unwrap().mean, 250.0);
        assert_eq!(summary.height.unwrap().count, 1);
        assert_eq!(summary.aspect_ratio.unwrap().max, 2.0);

        let text = summary.to_string();
        assert!(text.contains("Dataset format: files"));
        assert!(text.contains("Modalities: image"));
        assert!(text.contains("Total samples: 2"));
    }
}
