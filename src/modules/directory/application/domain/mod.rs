pub mod entities;
pub mod merge;
pub mod validation;

pub use entities::{
    FieldUpdate, LookupContext, NewUser, PageRequest, PageResult, SessionMetadata, SessionRecord,
    SortDirection, User, UserListFilter, UserLookup, UserPatch, UserSort, UserSortField,
    UserStatus,
};
