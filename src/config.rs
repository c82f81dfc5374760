/// Tunables of an ingestion run.
#[derive(Clone, Debug)]
pub struct IngestConfig {
    /// Games encoded per batch; one batch is fully written before the next is read.
    pub batch_size: usize,
    /// Worker threads; 0 means one per CPU.
    pub num_threads: usize,
    /// Drop games carrying an abandoned termination marker.
    pub ignore_abandoned: bool,
    /// Ingest sources that are already listed in the store manifest.
    pub allow_duplicates: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            batch_size: 1024,
            num_threads: 15,
            ignore_abandoned: true,
            allow_duplicates: false,
        }
    }
}

impl IngestConfig {
    pub fn threads(&self) -> usize {
        if self.num_threads == 0 {
            num_cpus::get()
        } else {
            self.num_threads
        }
    }
}
