mod chunker;
mod placement;
mod scheduler;
