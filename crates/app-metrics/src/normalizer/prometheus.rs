//! Prometheus text exposition format.
//!
//! Samples are grouped into metric families. Summary quantiles and histogram
//! buckets are folded, together with their `_sum` and `_count` samples, into
//! one series per label set. Every number is rendered as a string because the
//! format allows `NaN` and `±Inf`, which JSON numbers cannot hold.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use super::{NormalizeError, Normalizer};
use crate::metric::{MetricMap, Metrics};

/// Label name/value pairs of one series.
pub type Labels = BTreeMap<String, String>;

const QUANTILE_LABEL: &str = "quantile";
const BUCKET_LABEL: &str = "le";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Counter,
    Gauge,
    Summary,
    Histogram,
    Untyped,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Summary => "summary",
            Self::Histogram => "histogram",
            Self::Untyped => "untyped",
        }
    }
}

impl FromStr for MetricType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "counter" => Ok(Self::Counter),
            "gauge" => Ok(Self::Gauge),
            "summary" => Ok(Self::Summary),
            "histogram" => Ok(Self::Histogram),
            "untyped" => Ok(Self::Untyped),
            other => Err(format!("unknown metric type `{other}`")),
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named group of series sharing a type and help text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Family {
    pub name: String,
    pub help: String,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<Series>,
}

/// One series of a family.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Series {
    /// Counter, gauge and untyped samples.
    Value {
        #[serde(skip_serializing_if = "BTreeMap::is_empty")]
        labels: Labels,
        value: String,
    },
    Summary {
        #[serde(skip_serializing_if = "BTreeMap::is_empty")]
        labels: Labels,
        #[serde(skip_serializing_if = "BTreeMap::is_empty")]
        quantiles: BTreeMap<String, String>,
        count: String,
        sum: String,
    },
    Histogram {
        #[serde(skip_serializing_if = "BTreeMap::is_empty")]
        labels: Labels,
        /// Upper bound to cumulative count.
        #[serde(skip_serializing_if = "BTreeMap::is_empty")]
        buckets: BTreeMap<String, String>,
        count: String,
        sum: String,
    },
}

impl Series {
    pub fn labels(&self) -> &Labels {
        match self {
            Self::Value { labels, .. }
            | Self::Summary { labels, .. }
            | Self::Histogram { labels, .. } => labels,
        }
    }
}

/// Normalizer for the Prometheus text format.
#[derive(Debug, Clone, Copy, Default)]
pub struct Prometheus;

impl Prometheus {
    pub fn new() -> Self {
        Self
    }

    /// Parse an exposition into families, in order of first appearance.
    ///
    /// Families declared by `HELP`/`TYPE` lines without any sample are dropped.
    pub fn parse(&self, text: &str) -> Result<Vec<Family>, NormalizeError> {
        let mut parser = Parser::default();
        for (index, line) in text.lines().enumerate() {
            parser.parse_line(line, index + 1)?;
        }
        Ok(parser.finish())
    }
}

impl Normalizer for Prometheus {
    fn normalize(&self, raw: &[u8]) -> Result<Metrics, NormalizeError> {
        let text = std::str::from_utf8(raw)?;
        let mut map = MetricMap::new();
        for family in self.parse(text)? {
            let value = serde_json::to_value(&family)?;
            map.insert(family.name, value);
        }
        Ok(Metrics::Map(map))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SampleKind {
    /// Sample named exactly like its family.
    Bare,
    Sum,
    Count,
    Bucket,
}

#[derive(Default)]
struct Parser {
    families: Vec<FamilyBuilder>,
    by_name: HashMap<String, usize>,
}

struct FamilyBuilder {
    name: String,
    help: Option<String>,
    metric_type: Option<MetricType>,
    series: Vec<SeriesBuilder>,
}

#[derive(Default)]
struct SeriesBuilder {
    labels: Labels,
    value: Option<f64>,
    quantiles: Vec<(f64, f64)>,
    buckets: Vec<(f64, f64)>,
    count: Option<f64>,
    sum: Option<f64>,
}

impl Parser {
    fn parse_line(&mut self, line: &str, line_no: usize) -> Result<(), NormalizeError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        match line.strip_prefix('#') {
            Some(comment) => self.parse_comment(comment, line_no),
            None => self.parse_sample(line, line_no),
        }
    }

    fn parse_comment(&mut self, comment: &str, line_no: usize) -> Result<(), NormalizeError> {
        let (keyword, rest) = split_token(comment);
        match keyword {
            "HELP" => {
                let (name, help) = split_token(rest);
                check_metric_name(name, line_no)?;
                let family = self.family_mut(name);
                if family.help.is_some() {
                    return Err(NormalizeError::exposition(
                        line_no,
                        format!("second HELP line for metric name `{name}`"),
                    ));
                }
                family.help = Some(unescape_help(help.trim_start()));
            }
            "TYPE" => {
                let (name, kind) = split_token(rest);
                check_metric_name(name, line_no)?;
                let metric_type = kind
                    .trim()
                    .parse::<MetricType>()
                    .map_err(|reason| NormalizeError::exposition(line_no, reason))?;
                let family = self.family_mut(name);
                if family.metric_type.is_some() {
                    return Err(NormalizeError::exposition(
                        line_no,
                        format!("second TYPE line for metric name `{name}`"),
                    ));
                }
                if !family.series.is_empty() {
                    return Err(NormalizeError::exposition(
                        line_no,
                        format!("TYPE line for `{name}` appears after its samples"),
                    ));
                }
                family.metric_type = Some(metric_type);
            }
            // Any other comment is ignored.
            _ => {}
        }
        Ok(())
    }

    fn parse_sample(&mut self, line: &str, line_no: usize) -> Result<(), NormalizeError> {
        let name_end = line
            .find(|c: char| !is_metric_name_char(c))
            .unwrap_or(line.len());
        let name = &line[..name_end];
        check_metric_name(name, line_no)?;

        let mut rest = &line[name_end..];
        let mut labels = Labels::new();
        if let Some(body) = rest.strip_prefix('{') {
            let (parsed, after) =
                parse_labels(body).map_err(|reason| NormalizeError::exposition(line_no, reason))?;
            labels = parsed;
            rest = after;
        }

        let mut tokens = rest.split_whitespace();
        let raw_value = tokens.next().ok_or_else(|| {
            NormalizeError::exposition(line_no, format!("expected value after metric `{name}`"))
        })?;
        let value = parse_float(raw_value).ok_or_else(|| {
            NormalizeError::exposition(
                line_no,
                format!("invalid value `{raw_value}` for metric `{name}`"),
            )
        })?;

        // The timestamp is validated but not kept.
        if let Some(timestamp) = tokens.next() {
            timestamp.parse::<i64>().map_err(|_| {
                NormalizeError::exposition(line_no, format!("invalid timestamp `{timestamp}`"))
            })?;
        }
        if let Some(extra) = tokens.next() {
            return Err(NormalizeError::exposition(
                line_no,
                format!("unexpected `{extra}` after sample of `{name}`"),
            ));
        }

        self.record(name, labels, value, line_no)
    }

    fn record(
        &mut self,
        name: &str,
        mut labels: Labels,
        value: f64,
        line_no: usize,
    ) -> Result<(), NormalizeError> {
        let (index, kind) = self.resolve(name);
        let family = &mut self.families[index];
        let metric_type = family.metric_type.unwrap_or(MetricType::Untyped);

        match (metric_type, kind) {
            (MetricType::Summary, SampleKind::Bare) => {
                let quantile = take_bound(&mut labels, QUANTILE_LABEL, name, line_no)?;
                family.series_mut(labels).quantiles.push((quantile, value));
            }
            (MetricType::Histogram, SampleKind::Bucket) => {
                let bound = take_bound(&mut labels, BUCKET_LABEL, name, line_no)?;
                family.series_mut(labels).buckets.push((bound, value));
            }
            (MetricType::Histogram, SampleKind::Bare) | (_, SampleKind::Bucket) => {
                return Err(NormalizeError::exposition(
                    line_no,
                    format!("unexpected sample `{name}` for {metric_type} `{}`", family.name),
                ));
            }
            (_, SampleKind::Sum) => family.series_mut(labels).sum = Some(value),
            (_, SampleKind::Count) => family.series_mut(labels).count = Some(value),
            (_, SampleKind::Bare) => {
                let series = family.series_mut(labels);
                if series.value.is_some() {
                    return Err(NormalizeError::exposition(
                        line_no,
                        format!("duplicate sample for metric `{name}`"),
                    ));
                }
                series.value = Some(value);
            }
        }
        Ok(())
    }

    /// Find the family a sample belongs to, creating an untyped one if needed.
    fn resolve(&mut self, name: &str) -> (usize, SampleKind) {
        if let Some(&index) = self.by_name.get(name) {
            return (index, SampleKind::Bare);
        }

        for (suffix, kind) in [
            ("_sum", SampleKind::Sum),
            ("_count", SampleKind::Count),
            ("_bucket", SampleKind::Bucket),
        ] {
            let Some(&index) = name
                .strip_suffix(suffix)
                .and_then(|base| self.by_name.get(base))
            else {
                continue;
            };
            match (self.families[index].metric_type, kind) {
                (Some(MetricType::Histogram), _)
                | (Some(MetricType::Summary), SampleKind::Sum | SampleKind::Count) => {
                    return (index, kind);
                }
                _ => {}
            }
        }

        (self.family_index(name), SampleKind::Bare)
    }

    fn family_index(&mut self, name: &str) -> usize {
        if let Some(&index) = self.by_name.get(name) {
            return index;
        }
        self.families.push(FamilyBuilder::new(name));
        let index = self.families.len() - 1;
        self.by_name.insert(name.to_owned(), index);
        index
    }

    fn family_mut(&mut self, name: &str) -> &mut FamilyBuilder {
        let index = self.family_index(name);
        &mut self.families[index]
    }

    fn finish(self) -> Vec<Family> {
        self.families
            .into_iter()
            .filter(|family| !family.series.is_empty())
            .map(FamilyBuilder::build)
            .collect()
    }
}

impl FamilyBuilder {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            help: None,
            metric_type: None,
            series: Vec::new(),
        }
    }

    fn series_mut(&mut self, labels: Labels) -> &mut SeriesBuilder {
        let index = match self.series.iter().position(|series| series.labels == labels) {
            Some(index) => index,
            None => {
                self.series.push(SeriesBuilder {
                    labels,
                    ..Default::default()
                });
                self.series.len() - 1
            }
        };
        &mut self.series[index]
    }

    fn build(self) -> Family {
        let metric_type = self.metric_type.unwrap_or(MetricType::Untyped);
        Family {
            name: self.name,
            help: self.help.unwrap_or_default(),
            metric_type,
            metrics: self
                .series
                .into_iter()
                .map(|series| series.build(metric_type))
                .collect(),
        }
    }
}

impl SeriesBuilder {
    fn build(self, metric_type: MetricType) -> Series {
        let count = format_value(self.count.unwrap_or_default());
        let sum = format_value(self.sum.unwrap_or_default());
        match metric_type {
            MetricType::Summary => Series::Summary {
                labels: self.labels,
                quantiles: format_pairs(&self.quantiles),
                count,
                sum,
            },
            MetricType::Histogram => Series::Histogram {
                labels: self.labels,
                buckets: format_pairs(&self.buckets),
                count,
                sum,
            },
            MetricType::Counter | MetricType::Gauge | MetricType::Untyped => Series::Value {
                labels: self.labels,
                value: format_value(self.value.unwrap_or_default()),
            },
        }
    }
}

fn take_bound(
    labels: &mut Labels,
    label: &str,
    name: &str,
    line_no: usize,
) -> Result<f64, NormalizeError> {
    let raw = labels.remove(label).ok_or_else(|| {
        NormalizeError::exposition(
            line_no,
            format!("sample `{name}` is missing the `{label}` label"),
        )
    })?;
    parse_float(&raw).ok_or_else(|| {
        NormalizeError::exposition(line_no, format!("invalid `{label}` label value `{raw}`"))
    })
}

fn format_pairs(pairs: &[(f64, f64)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|&(key, value)| (format_value(key), format_value(value)))
        .collect()
}

/// Render a sample value the way the exposition format spells it.
///
/// Magnitudes below `1e-4` or from `1e21` up use exponent notation with a
/// signed, two-digit exponent (`1e+21`, `1.5e-07`).
fn format_value(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_owned();
    } else if value == f64::INFINITY {
        return "+Inf".to_owned();
    } else if value == f64::NEG_INFINITY {
        return "-Inf".to_owned();
    }

    let scientific = format!("{value:e}");
    match scientific
        .split_once('e')
        .and_then(|(mantissa, exponent)| Some((mantissa, exponent.parse::<i32>().ok()?)))
    {
        Some((mantissa, exponent)) if value != 0.0 && !(-4..21).contains(&exponent) => {
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exponent.abs())
        }
        _ => value.to_string(),
    }
}

fn parse_float(raw: &str) -> Option<f64> {
    match raw {
        "NaN" => Some(f64::NAN),
        "+Inf" | "Inf" => Some(f64::INFINITY),
        "-Inf" => Some(f64::NEG_INFINITY),
        _ => raw.parse().ok(),
    }
}

/// Split off the first whitespace-delimited token.
fn split_token(s: &str) -> (&str, &str) {
    s.trim_start()
        .split_once(char::is_whitespace)
        .unwrap_or((s.trim_start(), ""))
}

fn is_metric_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

fn check_metric_name(name: &str, line_no: usize) -> Result<(), NormalizeError> {
    let valid = name
        .chars()
        .next()
        .is_some_and(|first| !first.is_ascii_digit() && is_metric_name_char(first))
        && name.chars().all(is_metric_name_char);
    if valid {
        Ok(())
    } else {
        Err(NormalizeError::exposition(
            line_no,
            format!("invalid metric name `{name}`"),
        ))
    }
}

fn is_label_name(name: &str) -> bool {
    name.chars()
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Parse a label set; `input` starts right after the opening brace.
fn parse_labels(input: &str) -> Result<(Labels, &str), String> {
    let mut labels = Labels::new();
    let mut rest = input;

    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            return Err("unterminated label set".to_owned());
        }
        if let Some(after) = rest.strip_prefix('}') {
            return Ok((labels, after));
        }

        let name_end = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        let name = &rest[..name_end];
        if !is_label_name(name) {
            return Err(format!("invalid label name near `{rest}`"));
        }

        rest = rest[name_end..]
            .trim_start()
            .strip_prefix('=')
            .ok_or_else(|| format!("expected `=` after label name `{name}`"))?
            .trim_start()
            .strip_prefix('"')
            .ok_or_else(|| format!("expected quoted value for label `{name}`"))?;

        let (value, after) = parse_label_value(rest)?;
        if labels.insert(name.to_owned(), value).is_some() {
            return Err(format!("duplicate label name `{name}`"));
        }

        rest = after.trim_start();
        if let Some(after) = rest.strip_prefix(',') {
            rest = after;
        } else if !rest.starts_with('}') {
            return Err(format!("expected `,` or `}}` after label `{name}`"));
        }
    }
}

/// Read a label value up to its closing quote; `input` starts after the opening one.
fn parse_label_value(input: &str) -> Result<(String, &str), String> {
    let mut value = String::new();
    let mut chars = input.char_indices();

    while let Some((pos, c)) = chars.next() {
        match c {
            '"' => return Ok((value, &input[pos + 1..])),
            '\\' => match chars.next() {
                Some((_, '\\')) => value.push('\\'),
                Some((_, '"')) => value.push('"'),
                Some((_, 'n')) => value.push('\n'),
                Some((_, other)) => return Err(format!("invalid escape sequence `\\{other}`")),
                None => break,
            },
            _ => value.push(c),
        }
    }

    Err("unterminated label value".to_owned())
}

fn unescape_help(help: &str) -> String {
    let mut out = String::with_capacity(help.len());
    let mut chars = help.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
