/*!
 * # Role presets
 *
 * The three built-in roles. `insert_roles` in the user service writes them to the database
 * and resets their masks to these values on every run.
 */

use super::Permission;

pub const ROLE_OPERATOR: &str = "Operator";
pub const ROLE_MANAGER: &str = "Manager";
pub const ROLE_ADMINISTRATOR: &str = "Administrator";

/// Role definition with its permission mask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolePreset {
    pub name: &'static str,
    pub permissions: Permission,
    pub is_default: bool,
}

/// Built-in roles; the operator role is the default for new users.
pub fn role_presets() -> [RolePreset; 3] {
    [
        RolePreset {
            name: ROLE_OPERATOR,
            permissions: Permission::GENERATE_QR,
            is_default: true,
        },
        RolePreset {
            name: ROLE_MANAGER,
            permissions: Permission::ADD_PARTS
                | Permission::EDIT_PARTS
                | Permission::DELETE_PARTS
                | Permission::GENERATE_QR
                | Permission::VIEW_AUDIT_LOG
                | Permission::VIEW_REPORTS,
            is_default: false,
        },
        RolePreset {
            name: ROLE_ADMINISTRATOR,
            permissions: Permission::ALL,
            is_default: false,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_operator_is_default() {
        let defaults: Vec<_> = role_presets()
            .iter()
            .filter(|preset| preset.is_default)
            .map(|preset| preset.name)
            .collect();
        assert_eq!(defaults, vec![ROLE_OPERATOR]);
    }

    #[test]
    fn manager_cannot_manage_users_or_routes() {
        let manager = role_presets()[1];
        assert!(manager.permissions.contains(Permission::VIEW_REPORTS));
        assert!(!manager.permissions.allows(Permission::MANAGE_USERS));
        assert!(!manager.permissions.allows(Permission::MANAGE_ROUTES));
    }

    #[test]
    fn administrator_has_every_bit() {
        assert_eq!(role_presets()[2].permissions, Permission::ALL);
    }
}
