// Library exports for phorager
pub mod alignment;
pub mod cascade;
pub mod cluster;
pub mod config;
pub mod contig_index;
pub mod extract;
pub mod fasta;
pub mod interval_merge;
pub mod pipeline;
pub mod prediction;
pub mod quality;
pub mod summary;
pub mod table_io;
