//! The oracle core: coordinates, reading data and the [`Oracle`] itself.

pub mod coordinate;
pub mod oracle;
pub mod output;
pub mod reading;

pub use coordinate::{resolve, Coordinate, ParentCoord};
pub use oracle::Oracle;
pub use output::{HexagramResult, LineChange, OracleResponse, Prediction};
pub use reading::{Reading, ReadingRequest, DEFAULT_LANGUAGE, SUPPORTED_LANGUAGES};
