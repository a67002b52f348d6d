use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Plain-text run logger.
///
/// Each registered variable gets its own `<log_name>_<var>.log` file in
/// the log directory; every [`take`](Logger::take) appends one
/// whitespace-delimited row of numbers, so a full file is a numeric table
/// with one row per step and one column per vector component.
pub struct Logger {
    dir: PathBuf,
    name: String,
    writers: HashMap<String, BufWriter<File>>,
}

impl Logger {
    /// Open a logger for the given variables, creating the directory and
    /// truncating any previous logs of the same name.
    pub fn new(log_dir: impl AsRef<Path>, log_name: &str, vars: &[&str]) -> io::Result<Self> {
        let dir = log_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let mut writers = HashMap::new();
        for var in vars {
            let path = dir.join(format!("{log_name}_{var}.log"));
            let file = File::create(path)?;
            writers.insert((*var).to_string(), BufWriter::new(file));
        }
        Ok(Self {
            dir,
            name: log_name.to_string(),
            writers,
        })
    }

    /// The log directory.
    #[must_use]
    pub fn log_dir(&self) -> &Path {
        &self.dir
    }

    /// Path of one variable's log file.
    #[must_use]
    pub fn path(&self, var: &str) -> PathBuf {
        self.dir.join(format!("{}_{var}.log", self.name))
    }

    /// Append one row for a variable.
    ///
    /// Rows for unregistered variables are dropped with an error.
    pub fn take(&mut self, var: &str, row: &[f64]) -> io::Result<()> {
        let writer = self.writers.get_mut(var).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("unregistered variable {var}"))
        })?;
        let mut line = String::with_capacity(row.len() * 16);
        for (i, value) in row.iter().enumerate() {
            if i > 0 {
                line.push(' ');
            }
            line.push_str(&format!("{value:.12e}"));
        }
        writeln!(writer, "{line}")
    }

    /// Flush all writers.
    pub fn flush(&mut self) -> io::Result<()> {
        for writer in self.writers.values_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Read a whitespace-delimited numeric table back from disk.
pub fn read_table(path: impl AsRef<Path>) -> io::Result<Vec<Vec<f64>>> {
    let file = File::open(path)?;
    let mut rows = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let row: Result<Vec<f64>, _> = line.split_whitespace().map(str::parse::<f64>).collect();
        rows.push(row.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?);
    }
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
