//! Syntax node kinds of the Python grammar

use std::fmt;

macro_rules! node_kinds {
    ($($variant:ident => $name:literal,)*) => {
        /// Kind of a named node in the tree-sitter Python grammar.
        ///
        /// `Other` carries the grammar name of kinds added by grammar releases
        /// newer than this list.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum NodeKind {
            $($variant,)*
            Other(&'static str),
        }

        impl NodeKind {
            /// Determine the kind from a tree-sitter node type
            pub fn from_node_type(node_type: &'static str) -> Self {
                match node_type {
                    $($name => Self::$variant,)*
                    other => Self::Other(other),
                }
            }

            /// Grammar name of this kind
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)*
                    Self::Other(name) => *name,
                }
            }
        }
    };
}

node_kinds! {
    // Module and statements
    Module => "module",
    ExpressionStatement => "expression_statement",
    ImportStatement => "import_statement",
    ImportFromStatement => "import_from_statement",
    FutureImportStatement => "future_import_statement",
    AliasedImport => "aliased_import",
    WildcardImport => "wildcard_import",
    RelativeImport => "relative_import",
    ImportPrefix => "import_prefix",
    DottedName => "dotted_name",
    AssertStatement => "assert_statement",
    ReturnStatement => "return_statement",
    DeleteStatement => "delete_statement",
    RaiseStatement => "raise_statement",
    PassStatement => "pass_statement",
    BreakStatement => "break_statement",
    ContinueStatement => "continue_statement",
    GlobalStatement => "global_statement",
    NonlocalStatement => "nonlocal_statement",
    TypeAliasStatement => "type_alias_statement",
    IfStatement => "if_statement",
    ElifClause => "elif_clause",
    ElseClause => "else_clause",
    ForStatement => "for_statement",
    WhileStatement => "while_statement",
    TryStatement => "try_statement",
    ExceptClause => "except_clause",
    ExceptGroupClause => "except_group_clause",
    FinallyClause => "finally_clause",
    WithStatement => "with_statement",
    WithClause => "with_clause",
    WithItem => "with_item",
    MatchStatement => "match_statement",
    CaseClause => "case_clause",
    Block => "block",

    // Definitions
    FunctionDefinition => "function_definition",
    ClassDefinition => "class_definition",
    DecoratedDefinition => "decorated_definition",
    Decorator => "decorator",
    Parameters => "parameters",
    LambdaParameters => "lambda_parameters",
    DefaultParameter => "default_parameter",
    TypedParameter => "typed_parameter",
    TypedDefaultParameter => "typed_default_parameter",
    ListSplatPattern => "list_splat_pattern",
    DictionarySplatPattern => "dictionary_splat_pattern",
    TypeParameter => "type_parameter",
    Type => "type",
    GenericType => "generic_type",
    UnionType => "union_type",

    // Assignment targets and patterns
    Assignment => "assignment",
    AugmentedAssignment => "augmented_assignment",
    PatternList => "pattern_list",
    TuplePattern => "tuple_pattern",
    ListPattern => "list_pattern",
    AsPattern => "as_pattern",
    AsPatternTarget => "as_pattern_target",

    // Expressions
    Identifier => "identifier",
    Attribute => "attribute",
    Call => "call",
    ArgumentList => "argument_list",
    KeywordArgument => "keyword_argument",
    Subscript => "subscript",
    Slice => "slice",
    BinaryOperator => "binary_operator",
    UnaryOperator => "unary_operator",
    BooleanOperator => "boolean_operator",
    NotOperator => "not_operator",
    ComparisonOperator => "comparison_operator",
    ConditionalExpression => "conditional_expression",
    NamedExpression => "named_expression",
    Lambda => "lambda",
    Await => "await",
    Yield => "yield",
    ListSplat => "list_splat",
    DictionarySplat => "dictionary_splat",
    ParenthesizedExpression => "parenthesized_expression",
    ExpressionList => "expression_list",
    List => "list",
    Tuple => "tuple",
    Set => "set",
    Dictionary => "dictionary",
    Pair => "pair",
    ListComprehension => "list_comprehension",
    SetComprehension => "set_comprehension",
    DictionaryComprehension => "dictionary_comprehension",
    GeneratorExpression => "generator_expression",
    ForInClause => "for_in_clause",
    IfClause => "if_clause",

    // Literals
    String => "string",
    StringStart => "string_start",
    StringContent => "string_content",
    StringEnd => "string_end",
    EscapeSequence => "escape_sequence",
    Interpolation => "interpolation",
    ConcatenatedString => "concatenated_string",
    Integer => "integer",
    Float => "float",
    True => "true",
    False => "false",
    None => "none",
    Ellipsis => "ellipsis",

    // Trivia
    Comment => "comment",
    LineContinuation => "line_continuation",
    Error => "ERROR",
}

impl NodeKind {
    /// Kinds that open a new name scope.
    pub const fn is_scope(&self) -> bool {
        matches!(
            self,
            Self::Module | Self::FunctionDefinition | Self::ClassDefinition | Self::Lambda
        )
    }

    pub const fn is_definition(&self) -> bool {
        matches!(self, Self::FunctionDefinition | Self::ClassDefinition)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trips_grammar_names() {
        for name in ["function_definition", "identifier", "module", "ERROR"] {
            assert_eq!(NodeKind::from_node_type(name).as_str(), name);
        }
        assert_eq!(
            NodeKind::from_node_type("function_definition"),
            NodeKind::FunctionDefinition
        );
    }

    #[test]
    fn test_unknown_kinds_keep_their_name() {
        let kind = NodeKind::from_node_type("brand_new_statement");
        assert_eq!(kind, NodeKind::Other("brand_new_statement"));
        assert_eq!(kind.to_string(), "brand_new_statement");
    }
}
