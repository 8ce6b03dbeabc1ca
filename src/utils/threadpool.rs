/// How many worker threads a BFS run should use.
///
/// The variants build a [`rayon::ThreadPool`] whose size fixes both the
/// worker count and the dense thread-id range handed to the queues.
#[derive(Debug, Clone, Copy)]
pub enum Threads {
    /// One worker per available hardware thread.
    Default,
    /// Exactly this many workers.
    NumThreads(usize),
}

impl Threads {
    /// Builds the thread pool.
    ///
    /// # Panics
    ///
    /// If the pool cannot be built, which with these parameters only
    /// happens when the process is out of resources.
    pub fn build(self) -> rayon::ThreadPool {
        let num_threads = match self {
            Self::Default => 0,
            Self::NumThreads(num_threads) => num_threads,
        };
        rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .unwrap_or_else(|_| panic!("Should be able to build a threadpool ({self:?})"))
    }
}

impl From<usize> for Threads {
    fn from(num_threads: usize) -> Self {
        match num_threads {
            0 => Self::Default,
            _ => Self::NumThreads(num_threads),
        }
    }
}
