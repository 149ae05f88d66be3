//! Persistence ports of the tenancy domain.
//!
//! Every method takes the runner of the current unit of work and the scope
//! the service prepared for it. Implementations must apply that scope to
//! every statement; there is no unscoped variant.

mod assignments_repo;
mod sessions_repo;
mod tenants_repo;
mod users_repo;

pub use assignments_repo::AssignmentsRepository;
pub use sessions_repo::SessionsRepository;
pub use tenants_repo::TenantsRepository;
pub use users_repo::UsersRepository;
