/// CPIMS case categories as `(item_id, description)`.
const CASE_CATEGORIES: &[(&str, &str)] = &[
    ("CDIS", "Abandoned"),
    ("CDSA", "Abduction"),
    ("CLAB", "Child Affected by HIV/AIDS"),
    ("CORP", "Child Delinquency"),
    ("COSR", "Child headed household"),
    ("CTRF", "Child Labour"),
    ("CCCM", "Child Marriage"),
    ("SCCI", "Child of imprisoned parent (s)"),
    ("CSAB", "Child offender"),
    ("CSAD", "Child out of school"),
    ("CSHV", "Child pregnancy"),
    ("CSDQ", "Child radicalization"),
    ("CCCT", "Child truancy"),
    ("CSCL", "Child with disability"),
    ("CCIP", "Children / Persons on the streets"),
    ("CCCP", "Custody"),
    ("CCDF", "Defilement"),
    ("CSCT", "Disputed paternity"),
    ("CSDS", "Drug and Substance Abuse"),
    ("CCEA", "Emotional Abuse"),
    ("CSCS", "FGM"),
    ("CSCU", "Harmful cultural practice"),
    ("CSDF", "Incest"),
    ("CSDP", "Inheritance/Succession"),
    ("CFGM", "Internally displaced child"),
    ("CHCP", "Missing Child (Lost & Found)"),
    ("CSIC", "Neglect"),
    ("CIDC", "Orphaned Child"),
    ("CLFC", "Parental child abduction"),
    ("CSNG", "Physical abuse/violence"),
    ("CPCA", "Refugee Children"),
    ("CPAV", "Registration"),
    ("CSRC", "Sexual assault"),
    ("CSRG", "Sexual Exploitation and abuse"),
    ("CSSA", "Sick Child (Chronic Illness)"),
    ("CSSO", "Sodomy"),
    ("CSTC", "Trafficked child / Person"),
    ("CSUC", "Unlawful confinement"),
    ("CCOA", "Online Child Exploitation and Abuse"),
    ("CCMO", "Mother Offer"),
    ("CLCM", "Child Mother"),
    ("CCDT", "Destitution"),
    ("CSSM", "Smuggling"),
];

/// Case-insensitive match of a category description to its item id.
pub fn category_item_id(description: &str) -> Option<&'static str> {
    let wanted = description.trim();
    if wanted.is_empty() {
        return None;
    }
    CASE_CATEGORIES
        .iter()
        .find(|(_, label)| label.eq_ignore_ascii_case(wanted))
        .map(|(id, _)| *id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptions_resolve_case_insensitively() {
        assert_eq!(category_item_id("Defilement"), Some("CCDF"));
        assert_eq!(category_item_id(" sexual assault "), Some("CSRC"));
        assert_eq!(category_item_id("Space piracy"), None);
        assert_eq!(category_item_id(""), None);
    }
}
