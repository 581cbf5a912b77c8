//! Well-known attribute names used on the wire paths.

pub const ATTR_OBJECTCLASS: &str = "objectClass";
pub const ATTR_REF: &str = "ref";
pub const ATTR_SUBSCHEMA_SUBENTRY: &str = "subschemaSubentry";
pub const ATTR_ATTRIBUTE_TYPES: &str = "attributeTypes";
pub const ATTR_OBJECT_CLASSES: &str = "objectClasses";
pub const ATTR_NEWRDN: &str = "newrdn";
pub const ATTR_DELETEOLDRDN: &str = "deleteoldrdn";
pub const ATTR_NEWSUPERIOR: &str = "newsuperior";

/// The objectClass value that marks a subschema subentry.
pub const VAL_SUBSCHEMA: &str = "subschema";
