pub const OBJECT_CLASS: &str = "java/lang/Object";
pub const STRING_CLASS: &str = "java/lang/String";
pub const CLASS_CLASS: &str = "java/lang/Class";
pub const CLONEABLE_CLASS: &str = "java/lang/Cloneable";
pub const SERIALIZABLE_CLASS: &str = "java/io/Serializable";

// linkage errors
pub const LINKAGE_ERROR: &str = "java/lang/LinkageError";
pub const NO_CLASS_DEF_FOUND_ERROR: &str = "java/lang/NoClassDefFoundError";
pub const CLASS_FORMAT_ERROR: &str = "java/lang/ClassFormatError";
pub const CLASS_CIRCULARITY_ERROR: &str = "java/lang/ClassCircularityError";
pub const VERIFY_ERROR: &str = "java/lang/VerifyError";
pub const INCOMPATIBLE_CLASS_CHANGE_ERROR: &str = "java/lang/IncompatibleClassChangeError";
pub const NO_SUCH_METHOD_ERROR: &str = "java/lang/NoSuchMethodError";
pub const NO_SUCH_FIELD_ERROR: &str = "java/lang/NoSuchFieldError";
pub const INSTANTIATION_ERROR: &str = "java/lang/InstantiationError";
pub const ABSTRACT_METHOD_ERROR: &str = "java/lang/AbstractMethodError";
pub const EXCEPTION_IN_INITIALIZER_ERROR: &str = "java/lang/ExceptionInInitializerError";

// runtime exceptions
pub const NULL_POINTER_EXCEPTION: &str = "java/lang/NullPointerException";
pub const NEGATIVE_ARRAY_SIZE_EXCEPTION: &str = "java/lang/NegativeArraySizeException";
pub const ARRAY_INDEX_OUT_OF_BOUNDS_EXCEPTION: &str = "java/lang/ArrayIndexOutOfBoundsException";
pub const ARRAY_STORE_EXCEPTION: &str = "java/lang/ArrayStoreException";
pub const CLASS_CAST_EXCEPTION: &str = "java/lang/ClassCastException";
pub const OUT_OF_MEMORY_ERROR: &str = "java/lang/OutOfMemoryError";
