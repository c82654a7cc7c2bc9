use app_metrics_engine::InstanceMetric;
#[cfg(feature = "colored-output")]
use colored::*;

use crate::cli::OutputFormat;
use crate::error::Result;

pub struct OutputManager {
    colored: bool,
}

impl OutputManager {
    pub fn new(colored: bool) -> Self {
        Self { colored }
    }

    pub fn render(&self, batch: &[InstanceMetric], format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Pretty => self.format_pretty(batch),
            OutputFormat::Json => Ok(serde_json::to_string_pretty(batch)?),
            OutputFormat::JsonCompact => Ok(serde_json::to_string(batch)?),
        }
    }

    fn format_pretty(&self, batch: &[InstanceMetric]) -> Result<String> {
        let mut output = String::new();

        for metric in batch {
            output.push_str(&format!(
                "{} {}\n",
                self.colorize("Instance:", Color::Green, true),
                metric.instance()
            ));

            match (metric.metrics(), metric.error()) {
                (Some(metrics), _) => {
                    output.push_str(&self.colorize("Metrics:", Color::Yellow, false));
                    output.push('\n');
                    // Keys come out sorted: serde_json maps are ordered.
                    if let serde_json::Value::Object(map) = serde_json::to_value(metrics)? {
                        for (key, value) in &map {
                            output.push_str(&format!(
                                "  {}: {}\n",
                                self.colorize(key, Color::Cyan, false),
                                value
                            ));
                        }
                    }
                }
                (None, error) => {
                    output.push_str(&format!(
                        "{} {}\n",
                        self.colorize("Error:", Color::Red, true),
                        error.unwrap_or("unknown error")
                    ));
                }
            }
            output.push('\n');
        }

        Ok(output.trim_end().to_owned())
    }

    fn colorize(&self, text: &str, color: Color, bold: bool) -> String {
        #[cfg(feature = "colored-output")]
        {
            if self.colored {
                let colored_text = match color {
                    Color::Green => text.green(),
                    Color::Yellow => text.yellow(),
                    Color::Cyan => text.cyan(),
                    Color::Red => text.red(),
                };
                if bold {
                    colored_text.bold().to_string()
                } else {
                    colored_text.to_string()
                }
            } else {
                text.to_string()
            }
        }

        #[cfg(not(feature = "colored-output"))]
        {
            let _ = (self.colored, color, bold);
            text.to_string()
        }
    }
}

#[derive(Clone, Copy)]
enum Color {
    Green,
    Yellow,
    Cyan,
    Red,
}
