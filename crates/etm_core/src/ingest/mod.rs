pub mod snapshot_csv;
