pub const SUCCESS: i32 = 0;
/// Bad arguments, parameters, peg file or input file.
pub const INPUT_ERROR: i32 = 1;
pub const EXECUTION_ERROR: i32 = 2;
pub const BINARY_NOT_FOUND: i32 = 3;
