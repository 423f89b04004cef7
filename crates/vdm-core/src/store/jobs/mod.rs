//! Job CRUD on [`JobDb`](super::JobDb), split by direction.

mod read;
mod write;
