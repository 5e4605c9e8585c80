mod value;
mod pool;
mod metaclass;
mod objects;
mod lookup;

pub use value::{
    DATAHOLDER_SIZE, DataReader, EMPTY_DATAHOLDER, LoadDataError, ObjId, PropId, Val,
    read_dataholder, read_value, tag,
};
pub use pool::{Pool, PoolWriter};
pub use metaclass::Metaclass;
pub use objects::{
    IntrinsicClass, LookupKey, LookupTable, ObjectBody, TADSOBJ_CLASS_FLAG, TadsObject,
};
pub use lookup::{
    LookupResult, ObjectGraph, find_inherited, find_prop, is_instance_of, linearize,
};
