//! `#name#` substitutions applied to every token of a batch command line.

use std::path::{MAIN_SEPARATOR, Path};

use chrono::{DateTime, Local, Timelike};

/// Substitution values for one matched file, captured once at expansion time.
#[derive(Debug, Clone)]
pub struct Placeholders {
    pairs: Vec<(&'static str, String)>,
}

impl Placeholders {
    /// `index` is the 1-based position of the file in the batch.
    pub fn new(path: &Path, index: usize, now: DateTime<Local>) -> Self {
        let full = path.to_string_lossy().into_owned();
        let folder_no_sep = path
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let folder = if folder_no_sep.is_empty() {
            String::new()
        } else {
            format!("{folder_no_sep}{MAIN_SEPARATOR}")
        };
        let base = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = path
            .extension()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let no_ext = path.with_extension("").to_string_lossy().into_owned();
        let base_ext = if ext.is_empty() {
            base.clone()
        } else {
            format!("{base}.{ext}")
        };

        let millis = now.timestamp_subsec_millis().min(999);
        let hour_1_24 = match now.hour() {
            0 => 24,
            h => h,
        };
        let kk = format!("{hour_1_24:02}");
        let sss = format!("{millis:03}");

        let pairs = vec![
            ("#fn#", full),
            ("#fp#", folder),
            ("#fpns#", folder_no_sep),
            ("#fnnx#", no_ext),
            ("#fnb#", base),
            ("#fnx#", ext),
            ("#fnbx#", base_ext),
            ("#i#", index.to_string()),
            ("#i2#", format!("{index:02}")),
            ("#i3#", format!("{index:03}")),
            ("#i4#", format!("{index:04}")),
            ("#i5#", format!("{index:05}")),
            ("#i6#", format!("{index:06}")),
            ("#yyyyMMdd#", now.format("%Y%m%d").to_string()),
            ("#kkmmss#", format!("{kk}{}", now.format("%M%S"))),
            ("#HHmmss#", now.format("%H%M%S").to_string()),
            ("#kkmmssSSS#", format!("{kk}{}{sss}", now.format("%M%S"))),
            ("#HHmmssSSS#", format!("{}{sss}", now.format("%H%M%S"))),
            ("#yy#", now.format("%y").to_string()),
            ("#yyyy#", now.format("%Y").to_string()),
            ("#MM#", now.format("%m").to_string()),
            ("#dd#", now.format("%d").to_string()),
            ("#DDD#", now.format("%j").to_string()),
            ("#HH#", now.format("%H").to_string()),
            ("#kk#", kk.clone()),
            ("#mm#", now.format("%M").to_string()),
            ("#ss#", now.format("%S").to_string()),
            ("#SSS#", sss),
        ];
        Self { pairs }
    }

    /// Replace every known placeholder in `text`. Unknown `#...#` text is left alone.
    pub fn apply(&self, text: &str) -> String {
        if !text.contains('#') {
            return text.to_string();
        }
        let mut out = text.to_string();
        for (name, value) in &self.pairs {
            if out.contains(name) {
                out = out.replace(name, value);
            }
        }
        out
    }
}
