//! Helpers shared by processors

mod dataframe_changer;

pub use dataframe_changer::DataFramesChanger;
