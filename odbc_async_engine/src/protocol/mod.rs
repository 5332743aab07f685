pub mod param_value;
pub mod parameter;
pub mod types;
pub mod value;

pub use param_value::ParamValue;
pub use parameter::Parameter;
pub use types::{sql_type, CType, ColumnInfo, Nullability, OdbcType};
pub use value::Value;
