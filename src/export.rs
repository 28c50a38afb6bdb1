use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use tracing::info;

use crate::error::{Error, ExportError};
use crate::policy::{PolicyTable, ValueTable};
use crate::solver::SolveObserver;

/// Write a grid as CSV. The header row names the location #2 counts and the
/// first column holds the location #1 count.
pub fn write_grid<T: Display>(path: &Path, grid: &Array2<T>) -> Result<(), ExportError> {
    let mut wtr = csv::Writer::from_path(path)?;
    let mut header = vec![String::from("n1\\n2")];
    header.extend((0..grid.ncols()).map(|n2| n2.to_string()));
    wtr.write_record(&header)?;
    for (n1, row) in grid.rows().into_iter().enumerate() {
        let mut record = vec![n1.to_string()];
        record.extend(row.iter().map(|x| x.to_string()));
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Observer that saves every policy and the final value table under `dir`.
pub struct TableExport {
    dir: PathBuf,
}

impl TableExport {
    pub fn new(dir: &Path) -> Result<TableExport, ExportError> {
        fs::create_dir_all(dir)?;
        Ok(TableExport { dir: dir.to_path_buf() })
    }

    pub fn policy_path(&self, iteration: usize) -> PathBuf {
        self.dir.join(format!("policy_{iteration}.csv"))
    }

    pub fn value_path(&self) -> PathBuf {
        self.dir.join("value.csv")
    }
}

impl SolveObserver for TableExport {
    fn on_policy(&mut self, iteration: usize, policy: &PolicyTable) -> Result<(), Error> {
        let path = self.policy_path(iteration);
        write_grid(&path, &policy.policy)?;
        info!(path = %path.display(), "wrote policy");
        Ok(())
    }

    fn on_converged(
        &mut self,
        _iteration: usize,
        _policy: &PolicyTable,
        values: &ValueTable,
    ) -> Result<(), Error> {
        let path = self.value_path();
        write_grid(&path, &values.values)?;
        info!(path = %path.display(), "wrote value table");
        Ok(())
    }
}
