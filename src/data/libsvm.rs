//! LibSVM format loader
//!
//! Each non-empty line is `label index:value index:value ...` with one-based
//! feature indices. Lines starting with `#` are comments. Labels are kept as
//! given; the trainer remaps them to {-1, +1}.

use crate::core::{Dataset, DalError, Result, Sample, SparseVector};
use crate::data::FeatureTable;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct LibSVMDataset {
    samples: Vec<Sample>,
    dimensions: usize,
}

impl LibSVMDataset {
    /// Load a dataset from a LibSVM format file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    /// Load a dataset from any buffered reader
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut samples = Vec::new();
        let mut dimensions = 0;

        for (line_num, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let sample = Self::parse_line(line).map_err(|e| {
                DalError::Parse(format!("Error parsing line {}: {}", line_num + 1, e))
            })?;
            dimensions = dimensions.max(sample.features.dim());
            samples.push(sample);
        }

        if samples.is_empty() {
            return Err(DalError::EmptyDataset);
        }

        Ok(Self {
            samples,
            dimensions,
        })
    }

    fn parse_line(line: &str) -> Result<Sample> {
        let mut parts = line.split_whitespace();
        let label_str = parts
            .next()
            .ok_or_else(|| DalError::Parse("Empty line".to_string()))?;
        let label = label_str
            .parse::<f64>()
            .map_err(|_| DalError::Parse(format!("Invalid label: {label_str}")))?;

        let mut indices = Vec::new();
        let mut values = Vec::new();
        for feature in parts {
            let (index_str, value_str) = feature
                .split_once(':')
                .ok_or_else(|| DalError::Parse(format!("Invalid feature format: {feature}")))?;
            let index = index_str
                .parse::<usize>()
                .map_err(|_| DalError::Parse(format!("Invalid feature index: {index_str}")))?;
            let value = value_str
                .parse::<f64>()
                .map_err(|_| DalError::Parse(format!("Invalid feature value: {value_str}")))?;
            if index == 0 {
                return Err(DalError::Parse(
                    "Feature index must be positive: 0".to_string(),
                ));
            }
            indices.push(index - 1);
            values.push(value);
        }

        Ok(Sample::new(SparseVector::new(indices, values), label))
    }

    /// Feature rows as a table for the solvers
    pub fn to_table(&self) -> FeatureTable {
        let rows = self.samples.iter().map(|s| s.features.clone()).collect();
        FeatureTable::from_rows(rows)
    }
}

impl Dataset for LibSVMDataset {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn dim(&self) -> usize {
        self.dimensions
    }

    fn get_sample(&self, i: usize) -> Sample {
        self.samples[i].clone()
    }

    fn get_labels(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.label).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_line_basic() {
        let sample = LibSVMDataset::parse_line("+1 1:0.5 3:1.2").unwrap();
        assert_eq!(sample.label, 1.0);
        assert_eq!(sample.features.indices, vec![0, 2]);
        assert_eq!(sample.features.values, vec![0.5, 1.2]);
    }

    #[test]
    fn test_raw_labels_are_preserved() {
        let sample = LibSVMDataset::parse_line("3 1:1.0").unwrap();
        assert_eq!(sample.label, 3.0);
    }

    #[test]
    fn test_parse_line_invalid_format() {
        assert!(LibSVMDataset::parse_line("+1 1").is_err());
        assert!(LibSVMDataset::parse_line("+1 a:1.0").is_err());
        assert!(LibSVMDataset::parse_line("+1 0:1.0").is_err());
        assert!(LibSVMDataset::parse_line("abc 1:1.0").is_err());
    }

    #[test]
    fn test_from_reader() {
        let data = "# comment\n+1 1:2.0 2:1.0\n\n-1 3:-2.0\n";
        let dataset = LibSVMDataset::from_reader(Cursor::new(data)).unwrap();

        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.dim(), 3);
        assert_eq!(dataset.get_labels(), vec![1.0, -1.0]);

        let table = dataset.to_table();
        assert_eq!(table.n_rows(), 2);
        assert_eq!(table.norm_squared(0), 5.0);
    }

    #[test]
    fn test_from_reader_reports_line_number() {
        let data = "+1 1:2.0\n-1 bad\n";
        let err = LibSVMDataset::from_reader(Cursor::new(data)).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_from_reader_empty() {
        let result = LibSVMDataset::from_reader(Cursor::new("# only comments\n"));
        assert!(matches!(result, Err(DalError::EmptyDataset)));
    }
}
